//! RSFS Client
//!
//! The client data path of an erasure-coded file store:
//! - `ParallelOpBroker`: bounded fan-out of storage-node RPCs with per-call retry
//! - `WritePipeline` / `ReadPipeline`: stream bytes across blocks and slices,
//!   generating parity or recovering lost blocks at slice boundaries
//! - `FileSession`: Open/Close protocol with the master, including tail replication
//! - `RsfsClient`: process-wide entry point sharing the worker pool across sessions
//!
//! # Example
//!
//! ```no_run
//! use rsfs_client::{ClientConfig, RsfsClient};
//! use rsfs_client::memory::{MemoryMaster, MemoryStorage};
//! use std::sync::Arc;
//!
//! # async fn example() -> rsfs_core::Result<()> {
//! let storage = Arc::new(MemoryStorage::with_nodes(14));
//! let master = Arc::new(MemoryMaster::new(storage.node_addrs()));
//! let client = RsfsClient::new(ClientConfig::default(), master, storage)?;
//!
//! let mut file = client.open("/rsfs/hello.txt", "w").await?;
//! file.write(b"hello").await?;
//! file.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod copy;
pub mod master;
pub mod memory;
pub mod read;
pub mod registry;
pub mod rpc;
pub mod session;
pub mod tail;
pub mod write;

pub use broker::{FanOutOutcome, ParallelOpBroker, RetryDecision, RetryPolicy, RetryState};
pub use client::RsfsClient;
pub use config::ClientConfig;
pub use copy::{copy, copy_path};
pub use master::MasterClient;
pub use registry::{Backend, BackendRegistry, FileHandle, RSFS_PREFIX};
pub use rpc::{ChannelErrorKind, MasterRpc, RpcError, StorageNodeRpc};
pub use session::{FileSession, SessionState};
