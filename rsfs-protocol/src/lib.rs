//! RSFS Protocol Definitions
//!
//! Generated Rust code from Protocol Buffers.
//!
//! # Services
//! - `MasterService` - File open/close bookkeeping and listing
//! - `StorageNodeService` - Block stream open/close/read/write

/// Status codes shared by every response
pub mod status {
    tonic::include_proto!("rsfs.status");
}

/// Master service messages and client/server
pub mod master {
    tonic::include_proto!("rsfs.master");
}

/// Storage node service messages and client/server
pub mod snode {
    tonic::include_proto!("rsfs.snode");
}

// Re-export commonly used types
pub use master::master_service_client::MasterServiceClient;
pub use master::master_service_server::{MasterService, MasterServiceServer};
pub use snode::storage_node_service_client::StorageNodeServiceClient;
pub use snode::storage_node_service_server::{StorageNodeService, StorageNodeServiceServer};
