//! Process-wide RSFS client
//!
//! Owns the fan-out worker pool and the master connection shared by every
//! session it opens.

use crate::broker::ParallelOpBroker;
use crate::config::ClientConfig;
use crate::master::MasterClient;
use crate::rpc::{ListFileRequest, MasterRpc, StorageNodeRpc};
use crate::session::{FileSession, SessionEnv};
use rsfs_core::{FileMeta, OpenMode, Result, RsfsError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Entry point for opening and listing files
pub struct RsfsClient {
    config: ClientConfig,
    env: SessionEnv,
    /// Sequence ids for requests not tied to a session
    sequence_id: AtomicU64,
}

impl RsfsClient {
    pub fn new(
        config: ClientConfig,
        master: Arc<dyn MasterRpc>,
        storage: Arc<dyn StorageNodeRpc>,
    ) -> Result<Self> {
        config.validate()?;
        let erasure = config.erasure_config()?;
        let broker = ParallelOpBroker::new(
            config.pool.max_threads,
            config.wait.poll_interval(),
            config.wait.max_idle_polls,
        );
        let env = SessionEnv {
            master: Arc::new(MasterClient::new(master, &config.master)),
            storage,
            broker: Arc::new(broker),
            erasure,
            tail_backup_count: config.erasure.tail_backup_count,
            write_retry: config.write_retry(),
            read_retry: config.read_retry(),
        };
        Ok(Self {
            config,
            env,
            sequence_id: AtomicU64::new(rsfs_core::SEQUENCE_ID_START),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open `path` with mode `"r"` or `"w"`
    pub async fn open(&self, path: &str, mode: &str) -> Result<FileSession> {
        let mode = OpenMode::parse(mode)?;
        if path.is_empty() {
            return Err(RsfsError::BadParameter("empty path".to_string()));
        }
        let mut session = FileSession::new(self.env.clone(), path, mode);
        session.open().await?;
        Ok(session)
    }

    /// Files stored under `path`
    pub async fn list(&self, path: &str) -> Result<Vec<FileMeta>> {
        self.list_range(&format!("{path}#"), &format!("{path}~"))
            .await
    }

    /// Files with names in `[start, end)`, fetched page by page
    #[instrument(skip(self))]
    pub async fn list_range(&self, start: &str, end: &str) -> Result<Vec<FileMeta>> {
        let size_limit = self.config.rpc.list_size_limit_kb * 1024;
        let mut metas = Vec::new();
        let mut cursor = start.to_string();
        loop {
            let request = ListFileRequest {
                sequence_id: self.sequence_id.fetch_add(1, Ordering::Relaxed) + 1,
                path_start: cursor.clone(),
                path_end: end.to_string(),
                size_limit,
            };
            let page = self.env.master.list_file(request).await?;
            debug!(entries = page.metas.len(), last_one = %page.last_one, "Listed page");
            metas.extend(page.metas);

            if page.last_one.is_empty() || page.last_one.as_str() >= end {
                break;
            }
            if page.last_one <= cursor {
                return Err(RsfsError::Internal(format!(
                    "listing did not advance past {cursor:?}"
                )));
            }
            cursor = page.last_one;
        }
        Ok(metas)
    }
}

impl std::fmt::Debug for RsfsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsfsClient")
            .field("master", &self.config.master.addr)
            .field("erasure", &self.env.erasure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryMaster, MemoryStorage};

    fn client() -> RsfsClient {
        let storage = Arc::new(MemoryStorage::with_nodes(14));
        let master = Arc::new(MemoryMaster::new(storage.node_addrs()));
        RsfsClient::new(ClientConfig::default(), master, storage).unwrap()
    }

    #[tokio::test]
    async fn test_open_rejects_bad_mode_and_path() {
        let client = client();
        let err = client.open("/rsfs/a", "rw").await.unwrap_err();
        assert_eq!(err.kind(), rsfs_core::ErrorKind::BadParam);
        let err = client.open("", "w").await.unwrap_err();
        assert_eq!(err.kind(), rsfs_core::ErrorKind::BadParam);
    }

    #[tokio::test]
    async fn test_open_missing_file_for_read() {
        let client = client();
        let err = client.open("/rsfs/missing", "r").await.unwrap_err();
        assert_eq!(err.kind(), rsfs_core::ErrorKind::NotFound);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let storage = Arc::new(MemoryStorage::with_nodes(14));
        let master = Arc::new(MemoryMaster::new(storage.node_addrs()));
        let mut config = ClientConfig::default();
        config.pool.max_threads = 0;
        assert!(RsfsClient::new(config, master, storage).is_err());
    }
}
