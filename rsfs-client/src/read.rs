//! Read pipeline
//!
//! Resolves offsets to slices and keeps the most recently loaded slice in
//! the erasure engine. Sealed slices are fetched from all M+K nodes and
//! rebuilt when up to K blocks fail; the tail slice is fetched from its
//! replica rounds instead.

use crate::session::SessionContext;
use crate::tail;
use rsfs_core::{ErasureConfig, ErasureEngine, FileMeta, Result, RsfsError, SliceAddressing};
use tracing::{debug, warn};

/// Worst failure seen in any slice load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CrashTracker {
    slice: i64,
    count: u32,
}

impl CrashTracker {
    fn record(&mut self, slice: u64, count: u32) {
        if count > self.count {
            self.slice = slice as i64;
            self.count = count;
        }
    }
}

/// Slice-caching reader for a session opened in read mode
#[derive(Debug)]
pub struct ReadPipeline {
    engine: ErasureEngine,
    addressing: SliceAddressing,
    file_size: u64,
    tail_slice: i64,
    tail_num: usize,
    cached_slice: Option<u64>,
    seq_offset: u64,
    crash: CrashTracker,
}

impl ReadPipeline {
    pub fn new(config: ErasureConfig, meta: &FileMeta) -> Result<Self> {
        Ok(Self {
            engine: ErasureEngine::with_config(config)?,
            addressing: SliceAddressing::new(&config),
            file_size: meta.file_size,
            tail_slice: meta.tail_slice,
            tail_num: meta.tail_num as usize,
            cached_slice: None,
            seq_offset: 0,
            crash: CrashTracker {
                slice: meta.crash_slice,
                count: meta.crash_num,
            },
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Offset of the next sequential read
    pub fn position(&self) -> u64 {
        self.seq_offset
    }

    pub fn worst_crash(&self) -> (i64, u32) {
        (self.crash.slice, self.crash.count)
    }

    /// Bookkeeping reported back to the master on close
    pub fn meta(&self, name: &str) -> FileMeta {
        FileMeta {
            fid: 0,
            name: name.to_string(),
            file_size: self.file_size,
            tail_slice: self.tail_slice,
            tail_num: self.tail_num as u32,
            crash_slice: self.crash.slice,
            crash_num: self.crash.count,
        }
    }

    /// Read at the sequential cursor; returns 0 at end of file
    pub(crate) async fn read(&mut self, ctx: &mut SessionContext, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.seq_offset >= self.file_size {
            return Ok(0);
        }
        let n = self.read_at(ctx, buf, self.seq_offset as i64).await?;
        self.seq_offset += n as u64;
        Ok(n)
    }

    /// Read at `offset`, crossing slice boundaries as needed
    pub(crate) async fn read_at(
        &mut self,
        ctx: &mut SessionContext,
        buf: &mut [u8],
        offset: i64,
    ) -> Result<usize> {
        self.addressing.locate(offset, self.file_size)?;
        let start = offset as u64;
        let end = (start + buf.len() as u64).min(self.file_size);
        let slice_len = self.addressing.slice_len();

        let mut pos = start;
        while pos < end {
            let loc = self.addressing.locate(pos as i64, self.file_size)?;
            self.ensure_slice(ctx, loc.slice).await?;

            let n = (end - pos).min(slice_len - loc.offset_in_slice) as usize;
            let copied = (pos - start) as usize;
            self.copy_out(loc.offset_in_slice as usize, &mut buf[copied..copied + n])?;
            pos += n as u64;
        }
        Ok((end - start) as usize)
    }

    fn copy_out(&self, offset_in_slice: usize, out: &mut [u8]) -> Result<()> {
        let block_size = self.engine.config().block_size;
        let mut done = 0;
        while done < out.len() {
            let at = offset_in_slice + done;
            let (ordinal, in_block) = (at / block_size, at % block_size);
            let block = self.engine.get_block(ordinal).ok_or_else(|| {
                RsfsError::Internal(format!("block #{ordinal} not loaded"))
            })?;
            let n = (block_size - in_block).min(out.len() - done);
            out[done..done + n].copy_from_slice(&block[in_block..in_block + n]);
            done += n;
        }
        Ok(())
    }

    async fn ensure_slice(&mut self, ctx: &mut SessionContext, slice: u64) -> Result<()> {
        if self.cached_slice == Some(slice) {
            return Ok(());
        }
        self.cached_slice = None;
        self.engine.clean_cache();
        self.engine.clean_block();

        if self.tail_slice >= 0 && slice == self.tail_slice as u64 {
            self.load_tail(ctx, slice).await?;
        } else {
            self.load_sealed(ctx, slice).await?;
        }
        self.cached_slice = Some(slice);
        Ok(())
    }

    async fn load_sealed(&mut self, ctx: &mut SessionContext, slice: u64) -> Result<()> {
        let config = *self.engine.config();
        let ordinals: Vec<usize> = (0..config.total_blocks()).collect();
        let mut outcome = ctx.read_blocks(slice, &ordinals).await;
        for ordinal in ordinals {
            if let Some(payload) = outcome.take(ordinal) {
                self.engine.add_block(ordinal, &payload)?;
            }
        }

        let failed = outcome.failed_count();
        if failed == 0 {
            return Ok(());
        }
        self.crash.record(slice, failed as u32);
        if failed > config.parity_blocks {
            warn!(
                slice,
                failed,
                tolerated = config.parity_blocks,
                error = %outcome.first_error().unwrap_or_default(),
                "Slice unrecoverable"
            );
            return Err(RsfsError::DataLoss {
                slice,
                failed,
                tolerated: config.parity_blocks,
            });
        }

        debug!(slice, lost = ?outcome.failed_indices(), "Recovering lost blocks");
        self.engine.recover_lost_blocks()?;
        Ok(())
    }

    async fn load_tail(&mut self, ctx: &mut SessionContext, slice: u64) -> Result<()> {
        let loaded = tail::load(ctx, &mut self.engine, slice, self.tail_num).await?;
        if loaded.failed_rounds > 0 {
            self.crash.record(slice, loaded.failed_rounds);
        }
        if !loaded.missing.is_empty() {
            warn!(slice, missing = ?loaded.missing, "Tail slice lost");
            return Err(RsfsError::TailLost {
                slice,
                blocks: loaded.missing.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_tracker_keeps_worst() {
        let mut crash = CrashTracker { slice: -1, count: 0 };
        crash.record(3, 2);
        crash.record(5, 1);
        assert_eq!((crash.slice, crash.count), (3, 2));
        crash.record(7, 5);
        assert_eq!((crash.slice, crash.count), (7, 5));
        crash.record(8, 5);
        assert_eq!(crash.slice, 7);
    }

    #[test]
    fn test_meta_echoes_bookkeeping() {
        let meta = FileMeta {
            fid: 4,
            name: "/rsfs/a".into(),
            file_size: 100,
            tail_slice: 0,
            tail_num: 1,
            crash_slice: 2,
            crash_num: 3,
        };
        let pipeline = ReadPipeline::new(ErasureConfig::default(), &meta).unwrap();
        let reported = pipeline.meta("/rsfs/a");
        assert_eq!(reported.tail_slice, 0);
        assert_eq!(reported.tail_num, 1);
        assert_eq!(pipeline.worst_crash(), (2, 3));
        assert_eq!(pipeline.file_size(), 100);
        assert_eq!(pipeline.position(), 0);
    }
}
