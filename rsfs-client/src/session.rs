//! File sessions
//!
//! A `FileSession` is one open file handle. Opening negotiates the node set
//! with the master and opens one block stream per node; closing flushes the
//! write buffer, replicates the tail slice and reports final extents.
//!
//! State machine: `Closed -> Opening -> Open -> Closing -> Closed`.

use crate::broker::{FanOutOutcome, ParallelOpBroker, RetryPolicy};
use crate::master::MasterClient;
use crate::read::ReadPipeline;
use crate::rpc::{
    CloseDataRequest, CloseFileRequest, OpenDataRequest, OpenFileRequest, ReadDataRequest,
    StorageNodeRpc, WriteDataRequest,
};
use crate::write::WritePipeline;
use bytes::Bytes;
use rsfs_core::{
    BlockId, ErasureConfig, FileMeta, OpenMode, ReadType, Result, RsfsError, SEQUENCE_ID_START,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of a file session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Everything a session needs from its client
#[derive(Clone)]
pub struct SessionEnv {
    pub master: Arc<MasterClient>,
    pub storage: Arc<dyn StorageNodeRpc>,
    pub broker: Arc<ParallelOpBroker>,
    pub erasure: ErasureConfig,
    pub tail_backup_count: usize,
    pub write_retry: RetryPolicy,
    pub read_retry: RetryPolicy,
}

/// Per-file RPC context shared by the pipelines
pub(crate) struct SessionContext {
    pub file_id: u64,
    pub name: String,
    pub nodes: Arc<[String]>,
    pub erasure: ErasureConfig,
    pub tail_backup_count: usize,
    pub storage: Arc<dyn StorageNodeRpc>,
    pub broker: Arc<ParallelOpBroker>,
    pub write_retry: RetryPolicy,
    pub read_retry: RetryPolicy,
    /// Policy for opening and closing the primary streams
    stream_retry: RetryPolicy,
    sequence_id: u64,
}

/// One primary block-stream call
#[derive(Clone)]
struct StreamCall<R> {
    addr: String,
    request: R,
}

impl SessionContext {
    fn new(env: &SessionEnv, name: &str) -> Self {
        Self {
            file_id: 0,
            name: name.to_string(),
            nodes: Arc::from(Vec::new()),
            erasure: env.erasure,
            tail_backup_count: env.tail_backup_count,
            storage: Arc::clone(&env.storage),
            broker: Arc::clone(&env.broker),
            write_retry: env.write_retry,
            read_retry: env.read_retry,
            stream_retry: env.write_retry,
            sequence_id: SEQUENCE_ID_START,
        }
    }

    pub fn next_sequence_id(&mut self) -> u64 {
        self.sequence_id += 1;
        self.sequence_id
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Append stream on node `ordinal` holding that ordinal of every slice
    pub fn primary_block(&self, ordinal: usize) -> BlockId {
        BlockId::new(self.file_id, ordinal as u32)
    }

    /// Open the primary stream on every node
    ///
    /// Append streams follow the write policy, read streams the read policy,
    /// and the matching close uses the same one.
    async fn open_streams(&mut self, mode: ReadType) -> FanOutOutcome<()> {
        self.stream_retry = match mode {
            ReadType::Append => self.write_retry,
            _ => self.read_retry,
        };
        let calls: Vec<_> = (0..self.node_count())
            .map(|j| StreamCall {
                addr: self.nodes[j].clone(),
                request: OpenDataRequest {
                    sequence_id: self.next_sequence_id(),
                    block_id: self.primary_block(j),
                    mode,
                },
            })
            .collect();
        let storage = Arc::clone(&self.storage);
        self.broker
            .run(calls, self.stream_retry, move |call| {
                let storage = Arc::clone(&storage);
                async move { storage.open_data(&call.addr, call.request).await }
            })
            .await
    }

    /// Close the primary stream on every node
    async fn close_streams(&mut self) -> FanOutOutcome<()> {
        let calls: Vec<_> = (0..self.node_count())
            .map(|j| StreamCall {
                addr: self.nodes[j].clone(),
                request: CloseDataRequest {
                    sequence_id: self.next_sequence_id(),
                    block_id: self.primary_block(j),
                },
            })
            .collect();
        let storage = Arc::clone(&self.storage);
        self.broker
            .run(calls, self.stream_retry, move |call| {
                let storage = Arc::clone(&storage);
                async move { storage.close_data(&call.addr, call.request).await }
            })
            .await
    }

    /// Append `(ordinal, payload)` pairs to their primary streams
    pub async fn write_blocks(&mut self, blocks: Vec<(usize, Bytes)>) -> FanOutOutcome<()> {
        let calls: Vec<_> = blocks
            .into_iter()
            .map(|(ordinal, payload)| StreamCall {
                addr: self.nodes[ordinal].clone(),
                request: WriteDataRequest {
                    sequence_id: self.next_sequence_id(),
                    block_id: self.primary_block(ordinal),
                    payload,
                },
            })
            .collect();
        let storage = Arc::clone(&self.storage);
        self.broker
            .run(calls, self.write_retry, move |call| {
                let storage = Arc::clone(&storage);
                async move { storage.write_data(&call.addr, call.request).await }
            })
            .await
    }

    /// Read the given ordinals of `slice` from their primary streams
    pub async fn read_blocks(&mut self, slice: u64, ordinals: &[usize]) -> FanOutOutcome<Bytes> {
        let block_size = self.erasure.block_size;
        let calls: Vec<_> = ordinals
            .iter()
            .map(|&ordinal| StreamCall {
                addr: self.nodes[ordinal].clone(),
                request: ReadDataRequest {
                    sequence_id: self.next_sequence_id(),
                    block_id: self.primary_block(ordinal),
                    mode: ReadType::RandomRead,
                    payload_size: block_size as u32,
                    offset: slice * block_size as u64,
                },
            })
            .collect();
        let storage = Arc::clone(&self.storage);
        self.broker
            .run(calls, self.read_retry, move |call| {
                let storage = Arc::clone(&storage);
                async move { storage.read_data(&call.addr, call.request).await }
            })
            .await
    }
}

enum Pipeline {
    Write(WritePipeline),
    Read(ReadPipeline),
}

/// An open file handle
pub struct FileSession {
    name: String,
    mode: OpenMode,
    state: SessionState,
    env: SessionEnv,
    ctx: SessionContext,
    pipeline: Option<Pipeline>,
}

impl FileSession {
    /// Create a closed session for `name`
    pub fn new(env: SessionEnv, name: impl Into<String>, mode: OpenMode) -> Self {
        let name = name.into();
        let ctx = SessionContext::new(&env, &name);
        Self {
            name,
            mode,
            state: SessionState::Closed,
            env,
            ctx,
            pipeline: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn file_id(&self) -> u64 {
        self.ctx.file_id
    }

    /// Storage nodes assigned to this file
    pub fn nodes(&self) -> &[String] {
        &self.ctx.nodes
    }

    /// Negotiate placement with the master and open every block stream
    #[instrument(skip(self), fields(file = %self.name, mode = ?self.mode))]
    pub async fn open(&mut self) -> Result<()> {
        if self.state != SessionState::Closed {
            return Err(RsfsError::IllegalState(format!(
                "open called on a {:?} session",
                self.state
            )));
        }
        self.state = SessionState::Opening;
        match self.try_open().await {
            Ok(()) => {
                self.state = SessionState::Open;
                info!(file_id = self.ctx.file_id, "File opened");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                self.pipeline = None;
                warn!(error = %e, "Failed to open file");
                Err(e)
            }
        }
    }

    async fn try_open(&mut self) -> Result<()> {
        let total = self.env.erasure.total_blocks();
        self.ctx = SessionContext::new(&self.env, &self.name);
        let request = OpenFileRequest {
            sequence_id: self.ctx.next_sequence_id(),
            file_name: self.name.clone(),
            mode: self.mode,
            node_num: total as u32,
        };
        let reply = self.env.master.open_file(request).await?;
        if reply.nodes.len() != total {
            return Err(RsfsError::IllegalState(format!(
                "master assigned {} nodes, layout needs {}",
                reply.nodes.len(),
                total
            )));
        }
        self.ctx.file_id = reply.meta.fid;
        self.ctx.nodes = Arc::from(reply.nodes);

        let stream_mode = match self.mode {
            OpenMode::Write => ReadType::Append,
            OpenMode::Read => ReadType::RandomRead,
        };
        let outcome = self.ctx.open_streams(stream_mode).await;
        if !outcome.all_succeeded() {
            warn!(
                failed = ?outcome.failed_indices(),
                error = %outcome.first_error().unwrap_or_default(),
                "Block stream open failed"
            );
            self.ctx.close_streams().await;
            return Err(RsfsError::OpenFailed {
                opened: outcome.succeeded_count(),
                required: total,
            });
        }

        self.pipeline = Some(match self.mode {
            OpenMode::Write => Pipeline::Write(WritePipeline::new(self.env.erasure)?),
            OpenMode::Read => Pipeline::Read(ReadPipeline::new(self.env.erasure, &reply.meta)?),
        });
        Ok(())
    }

    /// Append `data` to the file
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        match self.pipeline.as_mut() {
            Some(Pipeline::Write(pipeline)) => pipeline.write(&mut self.ctx, data).await,
            _ => Err(RsfsError::IllegalState(
                "write on a session opened for reading".to_string(),
            )),
        }
    }

    /// Read from the sequential cursor
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        match self.pipeline.as_mut() {
            Some(Pipeline::Read(pipeline)) => pipeline.read(&mut self.ctx, buf).await,
            _ => Err(RsfsError::IllegalState(
                "read on a session opened for writing".to_string(),
            )),
        }
    }

    /// Read at `offset` without moving the sequential cursor
    pub async fn read_at(&mut self, buf: &mut [u8], offset: i64) -> Result<usize> {
        self.ensure_open()?;
        match self.pipeline.as_mut() {
            Some(Pipeline::Read(pipeline)) => pipeline.read_at(&mut self.ctx, buf, offset).await,
            _ => Err(RsfsError::IllegalState(
                "read on a session opened for writing".to_string(),
            )),
        }
    }

    /// Bytes accepted so far (write) or the declared file size (read)
    pub fn size(&self) -> u64 {
        match &self.pipeline {
            Some(Pipeline::Write(pipeline)) => pipeline.size(),
            Some(Pipeline::Read(pipeline)) => pipeline.file_size(),
            None => 0,
        }
    }

    /// Worst `(slice, failed blocks)` observed, `(-1, 0)` when none
    pub fn worst_crash(&self) -> (i64, u32) {
        match &self.pipeline {
            Some(Pipeline::Read(pipeline)) => pipeline.worst_crash(),
            _ => (-1, 0),
        }
    }

    /// Flush, replicate the tail, close every stream and report to the master
    #[instrument(skip(self), fields(file = %self.name, file_id = self.ctx.file_id))]
    pub async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = SessionState::Closing;

        let mut first_error = None;
        let mut meta = match self.pipeline.as_mut() {
            Some(Pipeline::Write(pipeline)) => {
                if let Err(e) = pipeline.finish(&mut self.ctx).await {
                    warn!(error = %e, "Failed to flush file on close");
                    first_error = Some(e);
                }
                pipeline.meta(&self.name)
            }
            Some(Pipeline::Read(pipeline)) => pipeline.meta(&self.name),
            None => FileMeta {
                name: self.name.clone(),
                tail_slice: -1,
                crash_slice: -1,
                ..Default::default()
            },
        };
        meta.fid = self.ctx.file_id;

        let outcome = self.ctx.close_streams().await;
        if !outcome.all_succeeded() {
            warn!(
                failed = ?outcome.failed_indices(),
                error = %outcome.first_error().unwrap_or_default(),
                "Some block streams did not close"
            );
        }

        debug!(
            file_size = meta.file_size,
            tail_slice = meta.tail_slice,
            tail_num = meta.tail_num,
            crash_slice = meta.crash_slice,
            crash_num = meta.crash_num,
            "Reporting close to master"
        );
        let request = CloseFileRequest {
            sequence_id: self.ctx.next_sequence_id(),
            meta,
        };
        let reported = self.env.master.close_file(request).await;

        self.state = SessionState::Closed;
        self.pipeline = None;
        reported?;
        match first_error {
            Some(e) => Err(e),
            None => {
                info!("File closed");
                Ok(())
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state != SessionState::Open {
            return Err(RsfsError::IllegalState(format!(
                "session for {} is {:?}",
                self.name, self.state
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSession")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("file_id", &self.ctx.file_id)
            .finish()
    }
}
