//! Master client with busy-status retry
//!
//! Every call is attempted up to `connect_retry_times`. A transport failure
//! sleeps the retry period, a busy/not-ready status sleeps the current call
//! timeout, and both double after each attempt.

use crate::config::MasterSettings;
use crate::rpc::{
    CloseFileRequest, ListFileReply, ListFileRequest, MasterRpc, OpenFileReply, OpenFileRequest,
    RpcError,
};
use rsfs_core::{Result, RsfsError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, warn};

/// Retrying wrapper around a `MasterRpc`
pub struct MasterClient {
    rpc: Arc<dyn MasterRpc>,
    retry_times: u32,
    retry_period: Duration,
    rpc_timeout: Duration,
}

impl MasterClient {
    pub fn new(rpc: Arc<dyn MasterRpc>, settings: &MasterSettings) -> Self {
        Self {
            rpc,
            retry_times: settings.connect_retry_times.max(1),
            retry_period: Duration::from_millis(settings.connect_retry_period_ms),
            rpc_timeout: Duration::from_millis(settings.connect_timeout_ms),
        }
    }

    pub async fn open_file(&self, request: OpenFileRequest) -> Result<OpenFileReply> {
        self.call("OpenFile", || self.rpc.open_file(request.clone()))
            .await
    }

    pub async fn close_file(&self, request: CloseFileRequest) -> Result<()> {
        self.call("CloseFile", || self.rpc.close_file(request.clone()))
            .await
    }

    pub async fn list_file(&self, request: ListFileRequest) -> Result<ListFileReply> {
        self.call("ListFile", || self.rpc.list_file(request.clone()))
            .await
    }

    async fn call<T, F, Fut>(&self, op: &'static str, send: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, RpcError>>,
    {
        let mut wait = self.retry_period;
        let mut rpc_timeout = self.rpc_timeout;
        let mut last_error = RpcError::Other(format!("{op} was never sent"));

        for attempt in 0..self.retry_times {
            let last_attempt = attempt + 1 == self.retry_times;
            let result = timeout(rpc_timeout, send())
                .await
                .unwrap_or(Err(RpcError::Timeout(rpc_timeout)));

            match result {
                Ok(value) => return Ok(value),
                Err(RpcError::Status(status)) if status.is_master_retryable() && !last_attempt => {
                    warn!(
                        op,
                        %status,
                        retry_after_ms = rpc_timeout.as_millis() as u64,
                        "Master is busy, retrying"
                    );
                    tokio::time::sleep(rpc_timeout).await;
                }
                Err(RpcError::Status(status)) => {
                    return Err(RsfsError::Master { op, status });
                }
                Err(err) => {
                    error!(op, attempt, error = %err, "Master request failed");
                    last_error = err;
                    if !last_attempt {
                        tokio::time::sleep(wait).await;
                    }
                }
            }
            wait *= 2;
            rpc_timeout *= 2;
        }

        Err(last_error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ChannelErrorKind;
    use async_trait::async_trait;
    use rsfs_core::{FileMeta, OpenMode, StatusCode};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Master that fails a fixed number of times before answering
    struct FlakyMaster {
        calls: AtomicU32,
        failures: u32,
        error: RpcError,
    }

    #[async_trait]
    impl MasterRpc for FlakyMaster {
        async fn open_file(
            &self,
            request: OpenFileRequest,
        ) -> std::result::Result<OpenFileReply, RpcError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(self.error.clone());
            }
            Ok(OpenFileReply {
                meta: FileMeta {
                    fid: 9,
                    name: request.file_name,
                    ..Default::default()
                },
                nodes: vec![],
            })
        }

        async fn close_file(&self, _request: CloseFileRequest) -> std::result::Result<(), RpcError> {
            Err(RpcError::Status(StatusCode::NotFound))
        }

        async fn list_file(
            &self,
            _request: ListFileRequest,
        ) -> std::result::Result<ListFileReply, RpcError> {
            Ok(ListFileReply::default())
        }
    }

    fn settings(retry_times: u32) -> MasterSettings {
        MasterSettings {
            addr: "unused".into(),
            connect_retry_times: retry_times,
            connect_retry_period_ms: 1,
            connect_timeout_ms: 10,
        }
    }

    fn request() -> OpenFileRequest {
        OpenFileRequest {
            sequence_id: 1,
            file_name: "/rsfs/a".into(),
            mode: OpenMode::Write,
            node_num: 14,
        }
    }

    #[tokio::test]
    async fn test_busy_master_is_retried() {
        let rpc = Arc::new(FlakyMaster {
            calls: AtomicU32::new(0),
            failures: 2,
            error: RpcError::Status(StatusCode::IsBusy),
        });
        let client = MasterClient::new(rpc.clone(), &settings(5));

        let reply = client.open_file(request()).await.unwrap();
        assert_eq!(reply.meta.fid, 9);
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_busy_on_last_attempt_is_returned() {
        let rpc = Arc::new(FlakyMaster {
            calls: AtomicU32::new(0),
            failures: 10,
            error: RpcError::Status(StatusCode::IsSecondary),
        });
        let client = MasterClient::new(rpc.clone(), &settings(3));

        let err = client.open_file(request()).await.unwrap_err();
        assert!(matches!(
            err,
            RsfsError::Master {
                status: StatusCode::IsSecondary,
                ..
            }
        ));
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transport_failure_exhausts_retries() {
        let rpc = Arc::new(FlakyMaster {
            calls: AtomicU32::new(0),
            failures: 10,
            error: RpcError::channel(ChannelErrorKind::ServerUnreachable, "refused"),
        });
        let client = MasterClient::new(rpc.clone(), &settings(4));

        let err = client.open_file(request()).await.unwrap_err();
        assert!(matches!(err, RsfsError::Rpc(_)));
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_terminal_status_is_not_retried() {
        let rpc = Arc::new(FlakyMaster {
            calls: AtomicU32::new(0),
            failures: 0,
            error: RpcError::Other(String::new()),
        });
        let client = MasterClient::new(rpc, &settings(5));
        let err = client
            .close_file(CloseFileRequest {
                sequence_id: 2,
                meta: FileMeta::default(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), rsfs_core::ErrorKind::NotFound);
    }
}
