//! Slice addressing
//!
//! Maps a logical file offset onto the slice that holds it and back.
//! Parity blocks carry no addressable bytes, so a slice covers
//! `M * block_size` bytes of file content.

use crate::erasure::ErasureConfig;
use crate::error::{Result, RsfsError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a block file on a storage node: `(file_id << 32) | ordinal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(u64);

impl BlockId {
    pub fn new(file_id: u64, ordinal: u32) -> Self {
        Self((file_id << 32) | ordinal as u64)
    }

    /// Dedicated block file for replica `round` (>= 1) of tail block `index`
    pub fn tail_replica(file_id: u64, node_count: usize, round: usize, index: usize) -> Self {
        Self::new(file_id, (round * node_count + index) as u32)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn file_id(&self) -> u64 {
        self.0 >> 32
    }

    pub fn ordinal(&self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id(), self.ordinal())
    }
}

/// Position of a file offset inside the striped layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceLocation {
    pub slice: u64,
    pub offset_in_slice: u64,
    /// Data block ordinal within the slice
    pub ordinal: usize,
    /// Byte offset within that block
    pub offset_in_block: usize,
}

/// Pure offset arithmetic for one erasure configuration
#[derive(Debug, Clone, Copy)]
pub struct SliceAddressing {
    block_size: usize,
    data_blocks: usize,
}

impl SliceAddressing {
    pub fn new(config: &ErasureConfig) -> Self {
        Self {
            block_size: config.block_size,
            data_blocks: config.data_blocks,
        }
    }

    /// Addressable bytes per slice
    pub fn slice_len(&self) -> u64 {
        (self.block_size * self.data_blocks) as u64
    }

    /// Locate `offset`; fails with `OutOfRange` past the end of the file
    pub fn locate(&self, offset: i64, file_size: u64) -> Result<SliceLocation> {
        if offset < 0 || offset as u64 >= file_size {
            return Err(RsfsError::OutOfRange { offset, file_size });
        }
        let offset = offset as u64;
        let slice_len = self.slice_len();
        let offset_in_slice = offset % slice_len;
        Ok(SliceLocation {
            slice: offset / slice_len,
            offset_in_slice,
            ordinal: (offset_in_slice / self.block_size as u64) as usize,
            offset_in_block: (offset_in_slice % self.block_size as u64) as usize,
        })
    }

    /// Inverse of `locate`
    pub fn offset_of(&self, slice: u64, ordinal: usize, offset_in_block: usize) -> u64 {
        slice * self.slice_len() + (ordinal * self.block_size + offset_in_block) as u64
    }

    /// Number of slices touched by a file of `file_size` bytes
    pub fn slice_count(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.slice_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_addressing() -> SliceAddressing {
        SliceAddressing::new(&ErasureConfig::default())
    }

    #[test]
    fn test_block_id_layout() {
        let id = BlockId::new(7, 3);
        assert_eq!(id.raw(), (7 << 32) | 3);
        assert_eq!(id.file_id(), 7);
        assert_eq!(id.ordinal(), 3);
        assert_eq!(id.to_string(), "7:3");
        assert_eq!(BlockId::from_raw(id.raw()), id);
    }

    #[test]
    fn test_tail_replica_ids_do_not_collide_with_primaries() {
        let primaries: Vec<BlockId> = (0..14).map(|j| BlockId::new(1, j)).collect();
        for round in 1..=3 {
            for index in 0..9 {
                let id = BlockId::tail_replica(1, 14, round, index);
                assert!(!primaries.contains(&id));
            }
        }
    }

    #[test]
    fn test_locate_slice_boundaries() {
        let addr = default_addressing();
        assert_eq!(addr.slice_len(), 81_920);

        let loc = addr.locate(81_920, 100_000).unwrap();
        assert_eq!(loc.slice, 1);
        assert_eq!(loc.offset_in_slice, 0);
        assert_eq!(loc.ordinal, 0);

        let loc = addr.locate(81_919, 100_000).unwrap();
        assert_eq!(loc.slice, 0);
        assert_eq!(loc.ordinal, 9);
        assert_eq!(loc.offset_in_block, 8191);

        assert_eq!(addr.slice_count(100_000), 2);
        assert_eq!(addr.slice_count(0), 0);
    }

    #[test]
    fn test_locate_out_of_range() {
        let addr = default_addressing();
        assert!(matches!(
            addr.locate(100_000, 100_000),
            Err(RsfsError::OutOfRange { .. })
        ));
        assert!(matches!(
            addr.locate(-1, 100_000),
            Err(RsfsError::OutOfRange { .. })
        ));
        assert!(addr.locate(0, 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_locate_inverts(offset in 0i64..10_000_000, extra in 1u64..1000) {
            let addr = default_addressing();
            let loc = addr.locate(offset, offset as u64 + extra).unwrap();
            prop_assert!(loc.ordinal < 10);
            prop_assert_eq!(
                addr.offset_of(loc.slice, loc.ordinal, loc.offset_in_block),
                offset as u64
            );
        }

        #[test]
        fn prop_block_ids_injective(fid_a in 0u64..1 << 31, fid_b in 0u64..1 << 31) {
            let a: Vec<BlockId> = (0..14).map(|j| BlockId::new(fid_a, j)).collect();
            for (i, x) in a.iter().enumerate() {
                for y in &a[i + 1..] {
                    prop_assert_ne!(x, y);
                }
            }
            if fid_a != fid_b {
                for j in 0..14 {
                    prop_assert!(!a.contains(&BlockId::new(fid_b, j)));
                }
            }
        }
    }
}
