//! gRPC clients for storage nodes and the master
//!
//! Channels are pooled per address and dropped after a transport failure so
//! the next attempt reconnects. Retries belong to the caller.

use crate::convert;
use crate::throttle::Throttle;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rsfs_client::config::ClientConfig;
use rsfs_client::rpc::{
    ChannelErrorKind, CloseDataRequest, CloseFileRequest, ListFileReply, ListFileRequest,
    MasterRpc, OpenDataRequest, OpenFileReply, OpenFileRequest, ReadDataRequest, RpcError,
    StorageNodeRpc, WriteDataRequest,
};
use rsfs_protocol::{master, snode, MasterServiceClient, StorageNodeServiceClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

/// Configuration for the gRPC clients
#[derive(Debug, Clone)]
pub struct GrpcClientConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Keep-alive interval
    pub keep_alive_interval: Duration,
    /// Outbound payload limit in MiB/s, 0 for none
    pub max_outflow_mb: u64,
    /// Inbound payload limit in MiB/s, 0 for none
    pub max_inflow_mb: u64,
}

impl Default for GrpcClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(180),
            request_timeout: Duration::from_secs(300),
            max_message_size: 64 * 1024 * 1024, // 64 MB
            keep_alive_interval: Duration::from_secs(60),
            max_outflow_mb: 0,
            max_inflow_mb: 0,
        }
    }
}

impl GrpcClientConfig {
    /// Storage-node transport settings from the client configuration
    pub fn from_client_config(config: &ClientConfig) -> Self {
        let (max_outflow_mb, max_inflow_mb) = if config.limit.enabled {
            (config.limit.max_outflow_mb, config.limit.max_inflow_mb)
        } else {
            (0, 0)
        };
        Self {
            connect_timeout: Duration::from_millis(config.rpc.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.rpc.timeout_ms),
            max_outflow_mb,
            max_inflow_mb,
            ..Default::default()
        }
    }

    /// Master transport settings from the client configuration
    ///
    /// Per-attempt deadlines are enforced by `MasterClient`, which doubles
    /// them on every retry, so the channel only carries the outer bound.
    pub fn for_master(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.master.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.rpc.timeout_ms),
            ..Default::default()
        }
    }

    fn endpoint(&self, addr: &str) -> Result<Endpoint, RpcError> {
        let url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        Ok(Channel::from_shared(url)
            .map_err(|e| RpcError::Other(format!("invalid endpoint {addr}: {e}")))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .http2_keep_alive_interval(self.keep_alive_interval)
            .keep_alive_timeout(Duration::from_secs(20)))
    }

    async fn connect(&self, addr: &str) -> Result<Channel, RpcError> {
        debug!(addr = %addr, "Creating new gRPC connection");
        let channel = self.endpoint(addr)?.connect().await.map_err(|e| {
            RpcError::channel(
                ChannelErrorKind::ServerUnreachable,
                format!("connection failed to {addr}: {e}"),
            )
        })?;
        info!(addr = %addr, "gRPC connection established");
        Ok(channel)
    }
}

/// `StorageNodeRpc` over gRPC
pub struct GrpcStorageClient {
    /// Connection pool: address -> client
    clients: Arc<RwLock<HashMap<String, StorageNodeServiceClient<Channel>>>>,
    config: GrpcClientConfig,
    outflow: Option<Throttle>,
    inflow: Option<Throttle>,
}

impl GrpcStorageClient {
    pub fn new(config: GrpcClientConfig) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            outflow: Throttle::from_mb(config.max_outflow_mb),
            inflow: Throttle::from_mb(config.max_inflow_mb),
            config,
        }
    }

    /// Get or create a client for the given address
    async fn get_client(&self, addr: &str) -> Result<StorageNodeServiceClient<Channel>, RpcError> {
        let cached = self.clients.read().get(addr).cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let channel = self.config.connect(addr).await?;
        let client = StorageNodeServiceClient::new(channel)
            .max_decoding_message_size(self.config.max_message_size)
            .max_encoding_message_size(self.config.max_message_size);
        self.clients.write().insert(addr.to_string(), client.clone());
        Ok(client)
    }

    /// Map a failed call, dropping the cached channel on transport errors
    fn call_failed(&self, addr: &str, status: tonic::Status) -> RpcError {
        let err = convert::status_error(status, self.config.request_timeout);
        if err.is_transient() {
            self.clients.write().remove(addr);
            debug!(addr = %addr, "Removed gRPC connection from cache");
        }
        err
    }

    pub fn connection_count(&self) -> usize {
        self.clients.read().len()
    }
}

impl Default for GrpcStorageClient {
    fn default() -> Self {
        Self::new(GrpcClientConfig::default())
    }
}

#[async_trait]
impl StorageNodeRpc for GrpcStorageClient {
    async fn open_data(&self, addr: &str, request: OpenDataRequest) -> Result<(), RpcError> {
        let mut client = self.get_client(addr).await?;
        let reply = client
            .open_data(snode::OpenDataRequest {
                sequence_id: request.sequence_id,
                block_id: request.block_id.raw(),
                mode: convert::stream_mode(request.mode) as i32,
            })
            .await
            .map_err(|e| self.call_failed(addr, e))?
            .into_inner();
        convert::check_status(reply.status)
    }

    async fn close_data(&self, addr: &str, request: CloseDataRequest) -> Result<(), RpcError> {
        let mut client = self.get_client(addr).await?;
        let reply = client
            .close_data(snode::CloseDataRequest {
                sequence_id: request.sequence_id,
                block_id: request.block_id.raw(),
            })
            .await
            .map_err(|e| self.call_failed(addr, e))?
            .into_inner();
        convert::check_status(reply.status)
    }

    async fn write_data(&self, addr: &str, request: WriteDataRequest) -> Result<(), RpcError> {
        if let Some(throttle) = &self.outflow {
            throttle.acquire(request.payload.len()).await;
        }
        let mut client = self.get_client(addr).await?;
        let reply = client
            .write_data(snode::WriteDataRequest {
                sequence_id: request.sequence_id,
                block_id: request.block_id.raw(),
                payload: request.payload,
            })
            .await
            .map_err(|e| self.call_failed(addr, e))?
            .into_inner();
        convert::check_status(reply.status)
    }

    async fn read_data(&self, addr: &str, request: ReadDataRequest) -> Result<Bytes, RpcError> {
        if let Some(throttle) = &self.inflow {
            throttle.acquire(request.payload_size as usize).await;
        }
        let mut client = self.get_client(addr).await?;
        let reply = client
            .read_data(snode::ReadDataRequest {
                sequence_id: request.sequence_id,
                block_id: request.block_id.raw(),
                r#type: convert::stream_mode(request.mode) as i32,
                payload_size: request.payload_size,
                offset: request.offset,
            })
            .await
            .map_err(|e| self.call_failed(addr, e))?
            .into_inner();
        convert::check_status(reply.status)?;
        Ok(reply.payload)
    }
}

/// `MasterRpc` over gRPC against a single master address
pub struct GrpcMasterClient {
    addr: String,
    config: GrpcClientConfig,
    client: RwLock<Option<MasterServiceClient<Channel>>>,
}

impl GrpcMasterClient {
    pub fn new(addr: impl Into<String>, config: GrpcClientConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
            client: RwLock::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn get_client(&self) -> Result<MasterServiceClient<Channel>, RpcError> {
        let cached = self.client.read().clone();
        if let Some(client) = cached {
            return Ok(client);
        }
        let client = MasterServiceClient::new(self.config.connect(&self.addr).await?);
        *self.client.write() = Some(client.clone());
        Ok(client)
    }

    fn call_failed(&self, status: tonic::Status) -> RpcError {
        let err = convert::status_error(status, self.config.request_timeout);
        if err.is_transient() {
            *self.client.write() = None;
        }
        err
    }
}

#[async_trait]
impl MasterRpc for GrpcMasterClient {
    async fn open_file(&self, request: OpenFileRequest) -> Result<OpenFileReply, RpcError> {
        let mut client = self.get_client().await?;
        let reply = client
            .open_file(master::OpenFileRequest {
                sequence_id: request.sequence_id,
                file_name: request.file_name.clone(),
                r#type: convert::open_type(request.mode) as i32,
                node_num: request.node_num,
            })
            .await
            .map_err(|e| self.call_failed(e))?
            .into_inner();
        convert::check_status(reply.status)?;

        Ok(OpenFileReply {
            meta: rsfs_core::FileMeta {
                fid: reply.fid,
                name: request.file_name,
                file_size: reply.file_size,
                tail_slice: reply.tail_slice,
                tail_num: reply.tail_num,
                crash_slice: reply.crash_slice,
                crash_num: reply.crash_num,
            },
            nodes: reply.nodes.into_iter().map(|n| n.addr).collect(),
        })
    }

    async fn close_file(&self, request: CloseFileRequest) -> Result<(), RpcError> {
        let mut client = self.get_client().await?;
        let meta = request.meta;
        let reply = client
            .close_file(master::CloseFileRequest {
                sequence_id: request.sequence_id,
                fid: meta.fid,
                file_name: meta.name,
                file_size: meta.file_size,
                tail_slice: meta.tail_slice,
                tail_num: meta.tail_num,
                crash_slice: meta.crash_slice,
                crash_num: meta.crash_num,
            })
            .await
            .map_err(|e| self.call_failed(e))?
            .into_inner();
        convert::check_status(reply.status)
    }

    async fn list_file(&self, request: ListFileRequest) -> Result<ListFileReply, RpcError> {
        let mut client = self.get_client().await?;
        let reply = client
            .list_file(master::ListFileRequest {
                sequence_id: request.sequence_id,
                path_start: request.path_start,
                path_end: request.path_end,
                size_limit: request.size_limit,
            })
            .await
            .map_err(|e| self.call_failed(e))?
            .into_inner();
        convert::check_status(reply.status)?;
        Ok(ListFileReply {
            metas: reply.metas.into_iter().map(convert::meta_from_wire).collect(),
            last_one: reply.last_one,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = GrpcClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.max_message_size, 64 * 1024 * 1024);
        assert_eq!(config.max_outflow_mb, 0);
    }

    #[test]
    fn test_config_from_client_config() {
        let mut client = ClientConfig::default();
        let config = GrpcClientConfig::from_client_config(&client);
        assert_eq!(config.connect_timeout, Duration::from_millis(180_000));
        assert_eq!(config.max_inflow_mb, 0);

        client.limit.enabled = true;
        let config = GrpcClientConfig::from_client_config(&client);
        assert_eq!(config.max_inflow_mb, 10);
        assert_eq!(config.max_outflow_mb, 10);

        let config = GrpcClientConfig::for_master(&client);
        assert_eq!(config.connect_timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn test_client_creation() {
        let client = GrpcStorageClient::default();
        assert_eq!(client.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transient() {
        let config = GrpcClientConfig {
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let client = GrpcStorageClient::new(config);
        // port 1 is never served in the test environment
        let err = client
            .open_data(
                "127.0.0.1:1",
                OpenDataRequest {
                    sequence_id: 1,
                    block_id: rsfs_core::BlockId::new(1, 0),
                    mode: rsfs_core::ReadType::Append,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_transient(), "{err}");
        assert_eq!(client.connection_count(), 0);
    }
}
