//! Reed-Solomon Erasure Engine
//!
//! Holds one slice worth of blocks in memory:
//! - M data blocks followed by K parity blocks, each exactly `block_size` bytes
//! - Short blocks are zero-padded on insert so parity and recovery always
//!   see identical inputs
//! - Any K of the M+K blocks can be lost and rebuilt bit-for-bit
//!
//! A secondary cache keeps the data blocks of the slice being written so
//! they survive parity generation and are available for tail replication.

use crate::error::{Result, RsfsError};
use crate::{DATA_BLOCKS, DEFAULT_BLOCK_SIZE, PARITY_BLOCKS};
use bytes::Bytes;
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};

/// Erasure coding configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// Number of data blocks per slice (M)
    pub data_blocks: usize,
    /// Number of parity blocks per slice (K)
    pub parity_blocks: usize,
    /// Size of every block in bytes
    pub block_size: usize,
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self {
            data_blocks: DATA_BLOCKS,
            parity_blocks: PARITY_BLOCKS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl ErasureConfig {
    /// Create a new erasure config
    pub fn new(data_blocks: usize, parity_blocks: usize, block_size: usize) -> Result<Self> {
        if data_blocks == 0 {
            return Err(RsfsError::Configuration(
                "data_blocks must be > 0".to_string(),
            ));
        }
        if parity_blocks == 0 {
            return Err(RsfsError::Configuration(
                "parity_blocks must be > 0".to_string(),
            ));
        }
        if data_blocks + parity_blocks > 256 {
            return Err(RsfsError::Configuration(format!(
                "data_blocks + parity_blocks must be <= 256, got {}",
                data_blocks + parity_blocks
            )));
        }
        if block_size == 0 {
            return Err(RsfsError::Configuration(
                "block_size must be > 0".to_string(),
            ));
        }
        Ok(Self {
            data_blocks,
            parity_blocks,
            block_size,
        })
    }

    /// Total number of blocks in a slice
    pub fn total_blocks(&self) -> usize {
        self.data_blocks + self.parity_blocks
    }

    /// Addressable file bytes covered by one slice
    pub fn slice_len(&self) -> u64 {
        (self.data_blocks * self.block_size) as u64
    }

    /// Maximum number of missing blocks that can be rebuilt
    pub fn max_failures(&self) -> usize {
        self.parity_blocks
    }
}

/// In-memory working set for one slice
pub struct ErasureEngine {
    config: ErasureConfig,
    codec: ReedSolomon,
    blocks: Vec<Option<Vec<u8>>>,
    cache: Vec<Option<Bytes>>,
}

impl ErasureEngine {
    /// Create an engine with the default (10, 4, 8192) configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ErasureConfig::default())
    }

    /// Create an engine with a custom configuration
    pub fn with_config(config: ErasureConfig) -> Result<Self> {
        let config = ErasureConfig::new(config.data_blocks, config.parity_blocks, config.block_size)?;
        let codec = ReedSolomon::new(config.data_blocks, config.parity_blocks)?;
        Ok(Self {
            config,
            codec,
            blocks: vec![None; config.total_blocks()],
            cache: vec![None; config.data_blocks],
        })
    }

    pub fn config(&self) -> &ErasureConfig {
        &self.config
    }

    /// Store a surviving block at `ordinal`, zero-padding short input
    pub fn add_block(&mut self, ordinal: usize, data: &[u8]) -> Result<()> {
        self.check_ordinal(ordinal, self.config.total_blocks())?;
        let block = self.padded(data)?;
        self.blocks[ordinal] = Some(block);
        Ok(())
    }

    /// Compute the K parity blocks from the M data blocks held
    pub fn create_parity_block(&mut self) -> Result<()> {
        let m = self.config.data_blocks;
        let present = self.blocks[..m].iter().filter(|b| b.is_some()).count();
        if present < m {
            return Err(RsfsError::IncompleteSlice {
                present,
                required: m,
            });
        }

        let (data, parity) = self.blocks.split_at_mut(m);
        let data_refs: Vec<&[u8]> = data.iter().flatten().map(Vec::as_slice).collect();
        let mut parity_bufs: Vec<Vec<u8>> =
            vec![vec![0u8; self.config.block_size]; self.config.parity_blocks];
        self.codec.encode_sep(&data_refs, &mut parity_bufs)?;

        for (slot, buf) in parity.iter_mut().zip(parity_bufs) {
            *slot = Some(buf);
        }
        Ok(())
    }

    /// Rebuild every block not currently present
    pub fn recover_lost_blocks(&mut self) -> Result<()> {
        let missing = self.blocks.iter().filter(|b| b.is_none()).count();
        if missing == 0 {
            return Ok(());
        }
        if missing > self.config.parity_blocks {
            return Err(RsfsError::Unrecoverable {
                missing,
                tolerated: self.config.parity_blocks,
            });
        }

        self.codec.reconstruct(&mut self.blocks)?;
        tracing::debug!(missing, "recovered lost blocks");
        Ok(())
    }

    /// Block at `ordinal`, original or recovered
    pub fn get_block(&self, ordinal: usize) -> Option<&[u8]> {
        self.blocks.get(ordinal)?.as_deref()
    }

    pub fn has_block(&self, ordinal: usize) -> bool {
        matches!(self.blocks.get(ordinal), Some(Some(_)))
    }

    /// Ordinals not currently present, in ascending order
    pub fn missing_blocks(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Drop the secondary data-block cache
    pub fn clean_cache(&mut self) {
        self.cache.iter_mut().for_each(|c| *c = None);
    }

    /// Drop every working block
    pub fn clean_block(&mut self) {
        self.blocks.iter_mut().for_each(|b| *b = None);
    }

    /// Retain a data block across parity generation and tail replication
    pub fn add_block_to_cache(&mut self, ordinal: usize, data: &[u8]) -> Result<()> {
        self.check_ordinal(ordinal, self.config.data_blocks)?;
        let block = self.padded(data)?;
        self.cache[ordinal] = Some(Bytes::from(block));
        Ok(())
    }

    pub fn get_block_from_cache(&self, ordinal: usize) -> Option<Bytes> {
        self.cache.get(ordinal)?.clone()
    }

    /// Check parity consistency of a complete slice
    pub fn verify(&self) -> Result<bool> {
        if self.blocks.iter().any(Option::is_none) {
            return Ok(false);
        }
        let refs: Vec<&[u8]> = self.blocks.iter().flatten().map(Vec::as_slice).collect();
        Ok(self.codec.verify(&refs)?)
    }

    fn check_ordinal(&self, ordinal: usize, bound: usize) -> Result<()> {
        if ordinal >= bound {
            return Err(RsfsError::InvalidBlockOrdinal {
                ordinal,
                max: bound - 1,
            });
        }
        Ok(())
    }

    fn padded(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() > self.config.block_size {
            return Err(RsfsError::BlockSizeMismatch {
                expected: self.config.block_size,
                actual: data.len(),
            });
        }
        let mut block = data.to_vec();
        block.resize(self.config.block_size, 0);
        Ok(block)
    }
}

impl std::fmt::Debug for ErasureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasureEngine")
            .field("config", &self.config)
            .field("missing", &self.missing_blocks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_config() -> ErasureConfig {
        ErasureConfig::new(4, 2, 16).unwrap()
    }

    fn fill(engine: &mut ErasureEngine, seed: u8) -> Vec<Vec<u8>> {
        let cfg = *engine.config();
        let data: Vec<Vec<u8>> = (0..cfg.data_blocks)
            .map(|i| {
                (0..cfg.block_size)
                    .map(|j| seed.wrapping_add((i * 31 + j) as u8))
                    .collect()
            })
            .collect();
        for (i, block) in data.iter().enumerate() {
            engine.add_block(i, block).unwrap();
        }
        data
    }

    #[test]
    fn test_erasure_config() {
        let config = ErasureConfig::default();
        assert_eq!(config.data_blocks, 10);
        assert_eq!(config.parity_blocks, 4);
        assert_eq!(config.total_blocks(), 14);
        assert_eq!(config.max_failures(), 4);
        assert_eq!(config.slice_len(), 81_920);
    }

    #[test]
    fn test_invalid_config() {
        assert!(ErasureConfig::new(0, 4, 8192).is_err());
        assert!(ErasureConfig::new(10, 0, 8192).is_err());
        assert!(ErasureConfig::new(200, 57, 8192).is_err());
        assert!(ErasureConfig::new(10, 4, 0).is_err());
    }

    #[test]
    fn test_parity_requires_full_slice() {
        let mut engine = ErasureEngine::with_config(small_config()).unwrap();
        engine.add_block(0, b"abc").unwrap();
        let result = engine.create_parity_block();
        assert!(matches!(
            result,
            Err(RsfsError::IncompleteSlice {
                present: 1,
                required: 4
            })
        ));
    }

    #[test]
    fn test_short_block_is_padded() {
        let mut engine = ErasureEngine::with_config(small_config()).unwrap();
        engine.add_block(2, b"xyz").unwrap();
        let block = engine.get_block(2).unwrap();
        assert_eq!(block.len(), 16);
        assert_eq!(&block[..3], b"xyz");
        assert!(block[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_oversized_block_rejected() {
        let mut engine = ErasureEngine::with_config(small_config()).unwrap();
        let result = engine.add_block(0, &[1u8; 17]);
        assert!(matches!(result, Err(RsfsError::BlockSizeMismatch { .. })));
        let result = engine.add_block(6, &[1u8; 4]);
        assert!(matches!(
            result,
            Err(RsfsError::InvalidBlockOrdinal { ordinal: 6, max: 5 })
        ));
    }

    #[test]
    fn test_recover_with_max_missing() {
        let mut engine = ErasureEngine::new().unwrap();
        let data = fill(&mut engine, 7);
        engine.create_parity_block().unwrap();
        assert!(engine.verify().unwrap());
        let parity: Vec<Vec<u8>> = (10..14)
            .map(|i| engine.get_block(i).unwrap().to_vec())
            .collect();

        // Reload the slice with 4 blocks lost
        engine.clean_block();
        for i in [1, 2, 3, 4, 5, 6, 7, 8, 10, 12] {
            let block = if i < 10 { &data[i] } else { &parity[i - 10] };
            engine.add_block(i, block).unwrap();
        }
        assert_eq!(engine.missing_blocks(), vec![0, 9, 11, 13]);

        engine.recover_lost_blocks().unwrap();
        assert!(engine.missing_blocks().is_empty());
        for (i, block) in data.iter().enumerate() {
            assert_eq!(engine.get_block(i).unwrap(), block.as_slice());
        }
        assert_eq!(engine.get_block(11).unwrap(), parity[1].as_slice());
    }

    #[test]
    fn test_too_many_missing_blocks() {
        let mut engine = ErasureEngine::with_config(small_config()).unwrap();
        fill(&mut engine, 1);
        engine.create_parity_block().unwrap();
        engine.clean_block();
        engine.add_block(0, &[0u8; 16]).unwrap();
        engine.add_block(1, &[0u8; 16]).unwrap();
        engine.add_block(2, &[0u8; 16]).unwrap();

        let result = engine.recover_lost_blocks();
        assert!(matches!(
            result,
            Err(RsfsError::Unrecoverable {
                missing: 3,
                tolerated: 2
            })
        ));
    }

    #[test]
    fn test_cache_survives_clean_block() {
        let mut engine = ErasureEngine::with_config(small_config()).unwrap();
        engine.add_block_to_cache(3, b"tail").unwrap();
        engine.clean_block();
        let cached = engine.get_block_from_cache(3).unwrap();
        assert_eq!(&cached[..4], b"tail");
        assert_eq!(cached.len(), 16);

        engine.clean_cache();
        assert!(engine.get_block_from_cache(3).is_none());
        assert!(engine.add_block_to_cache(4, b"x").is_err());
    }

    proptest! {
        #[test]
        fn prop_recovery_is_deterministic(
            seed in any::<u8>(),
            lost in proptest::sample::subsequence((0usize..6).collect::<Vec<_>>(), 0..=2),
        ) {
            let mut engine = ErasureEngine::with_config(small_config()).unwrap();
            fill(&mut engine, seed);
            engine.create_parity_block().unwrap();
            let originals: Vec<Vec<u8>> =
                (0..6).map(|i| engine.get_block(i).unwrap().to_vec()).collect();

            engine.clean_block();
            for (i, block) in originals.iter().enumerate() {
                if !lost.contains(&i) {
                    engine.add_block(i, block).unwrap();
                }
            }
            engine.recover_lost_blocks().unwrap();

            for (i, block) in originals.iter().enumerate() {
                prop_assert_eq!(engine.get_block(i).unwrap(), block.as_slice());
            }
        }
    }
}
