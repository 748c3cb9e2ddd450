//! RSFS Network Layer
//!
//! gRPC (tonic) transport for the client data path:
//! - `GrpcStorageClient` / `GrpcMasterClient` implement the client's RPC
//!   traits over pooled channels
//! - `Throttle` caps inbound and outbound payload bandwidth
//! - `spawn_storage_server` / `spawn_master_server` expose in-process
//!   backends on a socket
//!
//! # Usage
//!
//! ```ignore
//! use rsfs_client::{ClientConfig, RsfsClient};
//! use rsfs_network::connect;
//!
//! let config = ClientConfig::load_or_default("rsfs.toml").with_env_overrides();
//! let client = connect(config)?;
//! let mut file = client.open("/rsfs/data.bin", "r").await?;
//! ```

pub mod convert;
pub mod grpc_client;
pub mod grpc_server;
pub mod throttle;

pub use grpc_client::{GrpcClientConfig, GrpcMasterClient, GrpcStorageClient};
pub use grpc_server::{
    spawn_master_server, spawn_storage_server, GrpcServerConfig, MasterServiceImpl,
    StorageNodeServiceImpl,
};
pub use throttle::Throttle;

use rsfs_client::{ClientConfig, RsfsClient};
use std::sync::Arc;

/// Build an `RsfsClient` that talks gRPC to `config.master.addr`
pub fn connect(config: ClientConfig) -> rsfs_core::Result<RsfsClient> {
    let master = GrpcMasterClient::new(
        config.master.addr.clone(),
        GrpcClientConfig::for_master(&config),
    );
    let storage = GrpcStorageClient::new(GrpcClientConfig::from_client_config(&config));
    tracing::debug!(master = %config.master.addr, "Connecting RSFS client");
    RsfsClient::new(config, Arc::new(master), Arc::new(storage))
}
