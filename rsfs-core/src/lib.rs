//! RSFS Core Library
//!
//! Leaf abstractions for the RSFS client data path.
//! This crate provides:
//! - Reed-Solomon erasure engine holding one slice (M data + K parity blocks)
//! - Slice addressing (file offset <-> slice / block / intra-block offset)
//! - Block identities on storage nodes
//! - Concurrent per-participant status tables for fan-out operations
//! - Status codes, file metadata and the unified error type

pub mod addressing;
pub mod erasure;
pub mod error;
pub mod status_table;
pub mod types;

pub use addressing::{BlockId, SliceAddressing, SliceLocation};
pub use erasure::{ErasureConfig, ErasureEngine};
pub use error::{ErrorKind, Result, RsfsError};
pub use status_table::{OperationStatusTable, STATUS_FAILED, STATUS_SUCCESS, STATUS_UNSET};
pub use types::{FileMeta, OpenMode, ReadType, StatusCode};

/// Default erasure coding configuration
/// - 10 data blocks per slice
/// - 4 parity blocks per slice: any 4 lost blocks can be rebuilt
/// - 14 storage nodes per file
pub const DATA_BLOCKS: usize = 10;
pub const PARITY_BLOCKS: usize = 4;
pub const TOTAL_BLOCKS: usize = DATA_BLOCKS + PARITY_BLOCKS;

/// Default block size in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Default number of extra replicas written for an unsealed tail slice
pub const DEFAULT_TAIL_BACKUP_COUNT: usize = 3;

/// First sequence id handed out by a session is `SEQUENCE_ID_START + 1`
pub const SEQUENCE_ID_START: u64 = 0;
