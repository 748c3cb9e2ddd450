//! Write pipeline
//!
//! Buffers one block at a time. A full buffer is appended to the primary
//! stream of its ordinal; after the M-th data block of a slice the parity
//! blocks are generated and written, and the pipeline moves to the next
//! slice. Only data-block bytes count toward the file size.

use crate::session::SessionContext;
use crate::tail;
use bytes::Bytes;
use rsfs_core::{ErasureConfig, ErasureEngine, FileMeta, Result, RsfsError};
use tracing::{debug, warn};

/// Streaming striper for a session opened in write mode
#[derive(Debug)]
pub struct WritePipeline {
    engine: ErasureEngine,
    buffer: Vec<u8>,
    slice: u64,
    ordinal: usize,
    /// Data bytes durably appended to block streams
    file_size: u64,
    /// Set once a block write fails; the stream layout is no longer trustworthy
    poisoned: bool,
}

impl WritePipeline {
    pub fn new(config: ErasureConfig) -> Result<Self> {
        Ok(Self {
            engine: ErasureEngine::with_config(config)?,
            buffer: Vec::with_capacity(config.block_size),
            slice: 0,
            ordinal: 0,
            file_size: 0,
            poisoned: false,
        })
    }

    fn config(&self) -> ErasureConfig {
        *self.engine.config()
    }

    /// Bytes accepted so far, including the partially filled block
    pub fn size(&self) -> u64 {
        self.file_size + self.buffer.len() as u64
    }

    /// Slice currently being filled
    pub fn slice(&self) -> u64 {
        self.slice
    }

    /// Data blocks already written in the current slice
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub(crate) async fn write(&mut self, ctx: &mut SessionContext, data: &[u8]) -> Result<usize> {
        if self.poisoned {
            return Err(RsfsError::IllegalState(
                "an earlier block write failed".to_string(),
            ));
        }
        let block_size = self.config().block_size;
        let mut written = 0;
        while written < data.len() {
            let take = (block_size - self.buffer.len()).min(data.len() - written);
            self.buffer.extend_from_slice(&data[written..written + take]);
            written += take;
            if self.buffer.len() == block_size {
                self.commit_block(ctx).await?;
            }
        }
        Ok(written)
    }

    /// Flush the short final block and replicate the tail slice
    pub(crate) async fn finish(&mut self, ctx: &mut SessionContext) -> Result<()> {
        let mut result = Ok(());
        if !self.poisoned && !self.buffer.is_empty() {
            result = self.commit_block(ctx).await;
        }
        if self.ordinal > 0 {
            let blocks: Vec<Bytes> = (0..self.ordinal)
                .map(|i| {
                    self.engine.get_block_from_cache(i).ok_or_else(|| {
                        RsfsError::Internal(format!("tail block #{i} missing from cache"))
                    })
                })
                .collect::<Result<_>>()?;
            let replicated = tail::replicate(ctx, self.slice, &blocks).await;
            if result.is_ok() {
                result = replicated;
            }
        }
        result
    }

    /// Extents to report to the master
    pub fn meta(&self, name: &str) -> FileMeta {
        let has_tail = self.ordinal > 0;
        FileMeta {
            fid: 0,
            name: name.to_string(),
            file_size: self.file_size,
            tail_slice: if has_tail { self.slice as i64 } else { -1 },
            tail_num: self.ordinal as u32,
            crash_slice: -1,
            crash_num: 0,
        }
    }

    async fn commit_block(&mut self, ctx: &mut SessionContext) -> Result<()> {
        let ordinal = self.ordinal;
        let payload = Bytes::copy_from_slice(&self.buffer);
        let outcome = ctx.write_blocks(vec![(ordinal, payload)]).await;
        if !outcome.all_succeeded() {
            self.poisoned = true;
            let reason = outcome.first_error().unwrap_or_default();
            warn!(slice = self.slice, ordinal, error = %reason, "Data block write failed");
            return Err(RsfsError::WriteFailed(format!(
                "block #{ordinal} of slice #{}: {reason}",
                self.slice
            )));
        }

        self.file_size += self.buffer.len() as u64;
        self.engine.add_block(ordinal, &self.buffer)?;
        self.engine.add_block_to_cache(ordinal, &self.buffer)?;
        self.buffer.clear();
        self.ordinal += 1;
        debug!(slice = self.slice, ordinal, file_size = self.file_size, "Data block written");

        if self.ordinal == self.config().data_blocks {
            self.write_parity(ctx).await?;
        }
        Ok(())
    }

    async fn write_parity(&mut self, ctx: &mut SessionContext) -> Result<()> {
        let config = self.config();
        self.engine.create_parity_block()?;
        let blocks = (config.data_blocks..config.total_blocks())
            .map(|i| {
                self.engine
                    .get_block(i)
                    .map(|b| (i, Bytes::copy_from_slice(b)))
                    .ok_or_else(|| RsfsError::Internal(format!("parity block #{i} missing")))
            })
            .collect::<Result<Vec<_>>>()?;

        let outcome = ctx.write_blocks(blocks).await;
        if !outcome.all_succeeded() {
            self.poisoned = true;
            let reason = outcome.first_error().unwrap_or_default();
            warn!(
                slice = self.slice,
                failed = ?outcome.failed_indices(),
                error = %reason,
                "Parity write failed"
            );
            return Err(RsfsError::WriteFailed(format!(
                "parity of slice #{}: {reason}",
                self.slice
            )));
        }

        debug!(slice = self.slice, "Slice sealed with parity");
        self.slice += 1;
        self.ordinal = 0;
        self.engine.clean_cache();
        self.engine.clean_block();
        Ok(())
    }
}
