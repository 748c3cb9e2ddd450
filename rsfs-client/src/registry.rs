//! Path-prefix backend selection
//!
//! A `BackendRegistry` maps path prefixes to backend factories. It is built
//! explicitly by the caller; nothing registers itself.

use crate::client::RsfsClient;
use crate::session::FileSession;
use async_trait::async_trait;
use parking_lot::Mutex;
use rsfs_core::{FileMeta, Result, RsfsError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Prefix served by the erasure-coded store
pub const RSFS_PREFIX: &str = "/rsfs/";

/// An open file of any backend
#[async_trait]
pub trait FileHandle: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    fn size(&self) -> u64;

    async fn close(&mut self) -> Result<()>;
}

/// A file store reachable through a path prefix
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, path: &str, mode: &str) -> Result<Box<dyn FileHandle>>;

    async fn list(&self, path: &str) -> Result<Vec<FileMeta>>;
}

#[async_trait]
impl FileHandle for FileSession {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        FileSession::read(self, buf).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        FileSession::write(self, data).await
    }

    fn size(&self) -> u64 {
        FileSession::size(self)
    }

    async fn close(&mut self) -> Result<()> {
        FileSession::close(self).await
    }
}

#[async_trait]
impl Backend for RsfsClient {
    fn name(&self) -> &str {
        "rsfs"
    }

    async fn open(&self, path: &str, mode: &str) -> Result<Box<dyn FileHandle>> {
        let session = RsfsClient::open(self, path, mode).await?;
        Ok(Box::new(session))
    }

    async fn list(&self, path: &str) -> Result<Vec<FileMeta>> {
        RsfsClient::list(self, path).await
    }
}

/// Builds a backend on first use
pub type BackendFactory = Box<dyn Fn() -> Result<Arc<dyn Backend>> + Send + Sync>;

struct Entry {
    factory: BackendFactory,
    instance: Mutex<Option<Arc<dyn Backend>>>,
}

/// Prefix to backend mapping; the longest matching prefix wins
#[derive(Default)]
pub struct BackendRegistry {
    entries: BTreeMap<String, Entry>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for paths starting with `prefix`
    pub fn register<F>(&mut self, prefix: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Arc<dyn Backend>> + Send + Sync + 'static,
    {
        self.entries.insert(
            prefix.into(),
            Entry {
                factory: Box::new(factory),
                instance: Mutex::new(None),
            },
        );
        self
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Backend serving `path`
    pub fn resolve(&self, path: &str) -> Result<Arc<dyn Backend>> {
        let (prefix, entry) = self
            .entries
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .ok_or_else(|| RsfsError::BadParameter(format!("no backend serves {path:?}")))?;

        let mut instance = entry.instance.lock();
        if let Some(backend) = instance.as_ref() {
            return Ok(Arc::clone(backend));
        }
        let backend = (entry.factory)()?;
        debug!(prefix = %prefix, backend = backend.name(), "Backend created");
        *instance = Some(Arc::clone(&backend));
        Ok(backend)
    }

    /// Open `path` on the backend that serves it
    pub async fn open(&self, path: &str, mode: &str) -> Result<Box<dyn FileHandle>> {
        self.resolve(path)?.open(path, mode).await
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("prefixes", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NamedBackend(&'static str);

    #[async_trait]
    impl Backend for NamedBackend {
        fn name(&self) -> &str {
            self.0
        }

        async fn open(&self, path: &str, _mode: &str) -> Result<Box<dyn FileHandle>> {
            Err(RsfsError::NotFound(path.to_string()))
        }

        async fn list(&self, _path: &str) -> Result<Vec<FileMeta>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut registry = BackendRegistry::new();
        registry
            .register("/rsfs/", || Ok(Arc::new(NamedBackend("outer")) as Arc<dyn Backend>))
            .register("/rsfs/archive/", || {
                Ok(Arc::new(NamedBackend("archive")) as Arc<dyn Backend>)
            });

        assert_eq!(registry.resolve("/rsfs/a").unwrap().name(), "outer");
        assert_eq!(registry.resolve("/rsfs/archive/b").unwrap().name(), "archive");
    }

    #[test]
    fn test_unknown_prefix_is_bad_parameter() {
        let registry = BackendRegistry::new();
        let err = registry.resolve("/local/file").err().unwrap();
        assert_eq!(err.kind(), rsfs_core::ErrorKind::BadParam);
    }

    #[test]
    fn test_factory_runs_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let mut registry = BackendRegistry::new();
        registry.register(RSFS_PREFIX, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NamedBackend("rsfs")) as Arc<dyn Backend>)
        });

        for _ in 0..3 {
            registry.resolve("/rsfs/x").unwrap();
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
