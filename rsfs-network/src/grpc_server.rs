//! gRPC services backed by any `MasterRpc` / `StorageNodeRpc`
//!
//! Exposes an in-process master or storage node on a socket, for local
//! clusters and transport tests. Backend statuses travel in the response
//! body; transport-class failures become gRPC errors.

use crate::convert;
use rsfs_client::rpc::{
    CloseDataRequest, CloseFileRequest, ListFileRequest, MasterRpc, OpenDataRequest,
    OpenFileRequest, ReadDataRequest, RpcError, StorageNodeRpc, WriteDataRequest,
};
use rsfs_core::{BlockId, FileMeta, Result as RsfsResult, RsfsError};
use rsfs_protocol::{
    master, snode, MasterService, MasterServiceServer, StorageNodeService,
    StorageNodeServiceServer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

/// Configuration for the gRPC server
#[derive(Debug, Clone)]
pub struct GrpcServerConfig {
    /// Address to listen on; port 0 picks a free port
    pub listen_addr: SocketAddr,
    /// Maximum message size in bytes
    pub max_message_size: usize,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_message_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl GrpcServerConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Storage node service forwarding to `backend` at `backend_addr`
pub struct StorageNodeServiceImpl {
    backend: Arc<dyn StorageNodeRpc>,
    backend_addr: String,
}

impl StorageNodeServiceImpl {
    pub fn new(backend: Arc<dyn StorageNodeRpc>, backend_addr: impl Into<String>) -> Self {
        Self {
            backend,
            backend_addr: backend_addr.into(),
        }
    }
}

#[tonic::async_trait]
impl StorageNodeService for StorageNodeServiceImpl {
    #[instrument(skip(self, request), fields(node = %self.backend_addr))]
    async fn open_data(
        &self,
        request: Request<snode::OpenDataRequest>,
    ) -> Result<Response<snode::OpenDataResponse>, Status> {
        let req = request.into_inner();
        let mode = convert::read_type(req.mode)?;
        debug!(block = %BlockId::from_raw(req.block_id), ?mode, "OpenData");

        let result = self
            .backend
            .open_data(
                &self.backend_addr,
                OpenDataRequest {
                    sequence_id: req.sequence_id,
                    block_id: BlockId::from_raw(req.block_id),
                    mode,
                },
            )
            .await;
        Ok(Response::new(snode::OpenDataResponse {
            sequence_id: req.sequence_id,
            status: convert::reply_status(result)?,
        }))
    }

    async fn close_data(
        &self,
        request: Request<snode::CloseDataRequest>,
    ) -> Result<Response<snode::CloseDataResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .backend
            .close_data(
                &self.backend_addr,
                CloseDataRequest {
                    sequence_id: req.sequence_id,
                    block_id: BlockId::from_raw(req.block_id),
                },
            )
            .await;
        Ok(Response::new(snode::CloseDataResponse {
            sequence_id: req.sequence_id,
            status: convert::reply_status(result)?,
        }))
    }

    async fn write_data(
        &self,
        request: Request<snode::WriteDataRequest>,
    ) -> Result<Response<snode::WriteDataResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .backend
            .write_data(
                &self.backend_addr,
                WriteDataRequest {
                    sequence_id: req.sequence_id,
                    block_id: BlockId::from_raw(req.block_id),
                    payload: req.payload,
                },
            )
            .await;
        Ok(Response::new(snode::WriteDataResponse {
            sequence_id: req.sequence_id,
            status: convert::reply_status(result)?,
        }))
    }

    async fn read_data(
        &self,
        request: Request<snode::ReadDataRequest>,
    ) -> Result<Response<snode::ReadDataResponse>, Status> {
        let req = request.into_inner();
        let mode = convert::read_type(req.r#type)?;
        let result = self
            .backend
            .read_data(
                &self.backend_addr,
                ReadDataRequest {
                    sequence_id: req.sequence_id,
                    block_id: BlockId::from_raw(req.block_id),
                    mode,
                    payload_size: req.payload_size,
                    offset: req.offset,
                },
            )
            .await;
        let (status, payload) = split(result)?;
        Ok(Response::new(snode::ReadDataResponse {
            sequence_id: req.sequence_id,
            status,
            payload: payload.unwrap_or_default(),
        }))
    }
}

/// Master service forwarding to `backend`
pub struct MasterServiceImpl {
    backend: Arc<dyn MasterRpc>,
}

impl MasterServiceImpl {
    pub fn new(backend: Arc<dyn MasterRpc>) -> Self {
        Self { backend }
    }
}

#[tonic::async_trait]
impl MasterService for MasterServiceImpl {
    #[instrument(skip(self, request))]
    async fn open_file(
        &self,
        request: Request<master::OpenFileRequest>,
    ) -> Result<Response<master::OpenFileResponse>, Status> {
        let req = request.into_inner();
        let mode = convert::open_mode(req.r#type)?;
        debug!(file = %req.file_name, ?mode, "OpenFile");

        let result = self
            .backend
            .open_file(OpenFileRequest {
                sequence_id: req.sequence_id,
                file_name: req.file_name,
                mode,
                node_num: req.node_num,
            })
            .await;
        let (status, reply) = split(result)?;
        let reply = reply.unwrap_or_default();
        let meta = reply.meta;
        Ok(Response::new(master::OpenFileResponse {
            sequence_id: req.sequence_id,
            status,
            fid: meta.fid,
            file_size: meta.file_size,
            nodes: reply
                .nodes
                .into_iter()
                .map(|addr| master::NodeAddr { addr })
                .collect(),
            tail_slice: meta.tail_slice,
            tail_num: meta.tail_num,
            crash_slice: meta.crash_slice,
            crash_num: meta.crash_num,
        }))
    }

    async fn close_file(
        &self,
        request: Request<master::CloseFileRequest>,
    ) -> Result<Response<master::CloseFileResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .backend
            .close_file(CloseFileRequest {
                sequence_id: req.sequence_id,
                meta: FileMeta {
                    fid: req.fid,
                    name: req.file_name,
                    file_size: req.file_size,
                    tail_slice: req.tail_slice,
                    tail_num: req.tail_num,
                    crash_slice: req.crash_slice,
                    crash_num: req.crash_num,
                },
            })
            .await;
        Ok(Response::new(master::CloseFileResponse {
            sequence_id: req.sequence_id,
            status: convert::reply_status(result)?,
        }))
    }

    async fn list_file(
        &self,
        request: Request<master::ListFileRequest>,
    ) -> Result<Response<master::ListFileResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .backend
            .list_file(ListFileRequest {
                sequence_id: req.sequence_id,
                path_start: req.path_start,
                path_end: req.path_end,
                size_limit: req.size_limit,
            })
            .await;
        let (status, reply) = split(result)?;
        let reply = reply.unwrap_or_default();
        Ok(Response::new(master::ListFileResponse {
            sequence_id: req.sequence_id,
            status,
            metas: reply.metas.iter().map(convert::meta_to_wire).collect(),
            last_one: reply.last_one,
        }))
    }
}

/// Body status plus the value on success
fn split<T>(result: Result<T, RpcError>) -> Result<(i32, Option<T>), Status> {
    match result {
        Ok(value) => Ok((convert::reply_status(Ok(()))?, Some(value))),
        Err(err) => Ok((convert::reply_status(Err(err))?, None)),
    }
}

async fn bind(config: &GrpcServerConfig) -> RsfsResult<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

fn serve_error(e: tonic::transport::Error) -> RsfsError {
    RsfsError::Rpc(format!("gRPC server failed: {e}"))
}

/// Serve `backend` as a storage node; returns the bound address
pub async fn spawn_storage_server(
    config: GrpcServerConfig,
    backend: Arc<dyn StorageNodeRpc>,
    backend_addr: impl Into<String>,
) -> RsfsResult<(SocketAddr, JoinHandle<RsfsResult<()>>)> {
    let (listener, local_addr) = bind(&config).await?;
    let service = StorageNodeServiceImpl::new(backend, backend_addr);
    let server = StorageNodeServiceServer::new(service)
        .max_decoding_message_size(config.max_message_size)
        .max_encoding_message_size(config.max_message_size);

    info!(addr = %local_addr, "Starting storage node gRPC server");
    let handle = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(server)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .map_err(|e| {
                warn!(error = %e, "Storage node server stopped");
                serve_error(e)
            })
    });
    Ok((local_addr, handle))
}

/// Serve `backend` as the master; returns the bound address
pub async fn spawn_master_server(
    config: GrpcServerConfig,
    backend: Arc<dyn MasterRpc>,
) -> RsfsResult<(SocketAddr, JoinHandle<RsfsResult<()>>)> {
    let (listener, local_addr) = bind(&config).await?;
    let server = MasterServiceServer::new(MasterServiceImpl::new(backend));

    info!(addr = %local_addr, "Starting master gRPC server");
    let handle = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(server)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .map_err(|e| {
                warn!(error = %e, "Master server stopped");
                serve_error(e)
            })
    });
    Ok((local_addr, handle))
}
