//! RPC seams to the master and storage nodes
//!
//! The data path talks to its collaborators only through these traits.
//! `rsfs-network` provides the gRPC implementations, `memory` the in-process
//! fakes used by tests.

use async_trait::async_trait;
use bytes::Bytes;
use rsfs_core::{BlockId, FileMeta, OpenMode, ReadType, RsfsError, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Transport-level failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelErrorKind {
    ConnectionClosed,
    ServerShutdown,
    ServerUnreachable,
    ServerUnavailable,
    Other,
}

/// Failure of a single RPC attempt
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("channel error ({kind:?}): {message}")]
    Channel {
        kind: ChannelErrorKind,
        message: String,
    },

    #[error("rpc timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote returned {0}")]
    Status(StatusCode),

    #[error("rpc failed: {0}")]
    Other(String),
}

impl RpcError {
    pub fn channel(kind: ChannelErrorKind, message: impl Into<String>) -> Self {
        RpcError::Channel {
            kind,
            message: message.into(),
        }
    }

    /// Connection closed, server shutdown, unreachable or unavailable
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::Channel { kind, .. } if *kind != ChannelErrorKind::Other
        )
    }

    /// Whether a storage-node call should be attempted again
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Status(status) => status.is_storage_retryable(),
            other => other.is_transient(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RpcError::Status(status) => Some(*status),
            _ => None,
        }
    }
}

impl From<RpcError> for RsfsError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Timeout(after) => RsfsError::Timeout(format!("rpc timed out after {after:?}")),
            other => RsfsError::Rpc(other.to_string()),
        }
    }
}

// ===== Master messages =====

#[derive(Debug, Clone)]
pub struct OpenFileRequest {
    pub sequence_id: u64,
    pub file_name: String,
    pub mode: OpenMode,
    pub node_num: u32,
}

/// Layout of an opened file
#[derive(Debug, Clone, Default)]
pub struct OpenFileReply {
    pub meta: FileMeta,
    /// Storage node addresses, one per block ordinal
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CloseFileRequest {
    pub sequence_id: u64,
    /// Final extents and crash bookkeeping; `meta.name` names the file
    pub meta: FileMeta,
}

#[derive(Debug, Clone)]
pub struct ListFileRequest {
    pub sequence_id: u64,
    pub path_start: String,
    pub path_end: String,
    pub size_limit: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ListFileReply {
    pub metas: Vec<FileMeta>,
    /// First key not returned, empty once the range is exhausted
    pub last_one: String,
}

/// Metadata server calls; non-OK statuses surface as `RpcError::Status`
#[async_trait]
pub trait MasterRpc: Send + Sync {
    async fn open_file(&self, request: OpenFileRequest) -> Result<OpenFileReply, RpcError>;

    async fn close_file(&self, request: CloseFileRequest) -> Result<(), RpcError>;

    async fn list_file(&self, request: ListFileRequest) -> Result<ListFileReply, RpcError>;
}

// ===== Storage node messages =====

#[derive(Debug, Clone)]
pub struct OpenDataRequest {
    pub sequence_id: u64,
    pub block_id: BlockId,
    pub mode: ReadType,
}

#[derive(Debug, Clone)]
pub struct CloseDataRequest {
    pub sequence_id: u64,
    pub block_id: BlockId,
}

#[derive(Debug, Clone)]
pub struct WriteDataRequest {
    pub sequence_id: u64,
    pub block_id: BlockId,
    pub payload: Bytes,
}

#[derive(Debug, Clone)]
pub struct ReadDataRequest {
    pub sequence_id: u64,
    pub block_id: BlockId,
    pub mode: ReadType,
    pub payload_size: u32,
    /// Ignored for sequential reads
    pub offset: u64,
}

/// Block-file calls against the storage node at `addr`
#[async_trait]
pub trait StorageNodeRpc: Send + Sync {
    async fn open_data(&self, addr: &str, request: OpenDataRequest) -> Result<(), RpcError>;

    async fn close_data(&self, addr: &str, request: CloseDataRequest) -> Result<(), RpcError>;

    async fn write_data(&self, addr: &str, request: WriteDataRequest) -> Result<(), RpcError>;

    async fn read_data(&self, addr: &str, request: ReadDataRequest) -> Result<Bytes, RpcError>;
}
