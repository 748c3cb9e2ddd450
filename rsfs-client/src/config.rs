//! Client configuration
//!
//! Supports loading from TOML files and `RSFS_*` environment variables.
//! Every section falls back to its defaults when omitted.

use crate::broker::RetryPolicy;
use rsfs_core::{ErasureConfig, Result, RsfsError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Master connection
    #[serde(default)]
    pub master: MasterSettings,

    /// Erasure coding layout
    #[serde(default)]
    pub erasure: ErasureSettings,

    /// Storage-node RPC behavior
    #[serde(default)]
    pub rpc: RpcSettings,

    /// Fan-out worker pool
    #[serde(default)]
    pub pool: PoolSettings,

    /// Fan-out wait budget
    #[serde(default)]
    pub wait: WaitSettings,

    /// Bandwidth limits
    #[serde(default)]
    pub limit: LimitSettings,
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| RsfsError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let erasure = self.erasure_config()?;
        // round 0 plus every backup round needs its own node
        if self.erasure.tail_backup_count >= erasure.total_blocks() {
            return Err(RsfsError::Configuration(format!(
                "erasure.tail_backup_count ({}) must be below the node count ({})",
                self.erasure.tail_backup_count,
                erasure.total_blocks()
            )));
        }
        if self.pool.max_threads == 0 {
            return Err(RsfsError::Configuration(
                "pool.max_threads must be > 0".to_string(),
            ));
        }
        if self.pool.min_threads > self.pool.max_threads {
            return Err(RsfsError::Configuration(format!(
                "pool.min_threads ({}) exceeds pool.max_threads ({})",
                self.pool.min_threads, self.pool.max_threads
            )));
        }
        if self.wait.max_idle_polls == 0 {
            return Err(RsfsError::Configuration(
                "wait.max_idle_polls must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var("RSFS_MASTER_ADDR") {
            self.master.addr = addr;
        }
        self.master.connect_retry_times =
            env_parse("RSFS_MASTER_RETRY_TIMES").unwrap_or(self.master.connect_retry_times);
        self.erasure.data_blocks =
            env_parse("RSFS_DATA_BLOCKS").unwrap_or(self.erasure.data_blocks);
        self.erasure.parity_blocks =
            env_parse("RSFS_PARITY_BLOCKS").unwrap_or(self.erasure.parity_blocks);
        self.erasure.block_size = env_parse("RSFS_BLOCK_SIZE").unwrap_or(self.erasure.block_size);
        self.erasure.tail_backup_count =
            env_parse("RSFS_TAIL_BACKUP_COUNT").unwrap_or(self.erasure.tail_backup_count);
        self.rpc.write_retry_times =
            env_parse("RSFS_WRITE_RETRY_TIMES").unwrap_or(self.rpc.write_retry_times);
        self.rpc.read_retry_times =
            env_parse("RSFS_READ_RETRY_TIMES").unwrap_or(self.rpc.read_retry_times);
        self.rpc.timeout_ms = env_parse("RSFS_RPC_TIMEOUT_MS").unwrap_or(self.rpc.timeout_ms);
        self.pool.max_threads = env_parse("RSFS_MAX_THREADS").unwrap_or(self.pool.max_threads);
        self.limit.enabled = env_parse("RSFS_LIMIT_ENABLED").unwrap_or(self.limit.enabled);
        self
    }

    /// Erasure layout, validated
    pub fn erasure_config(&self) -> Result<ErasureConfig> {
        ErasureConfig::new(
            self.erasure.data_blocks,
            self.erasure.parity_blocks,
            self.erasure.block_size,
        )
    }

    pub fn write_retry(&self) -> RetryPolicy {
        RetryPolicy {
            retry_times: self.rpc.write_retry_times,
            retry_period: Duration::from_millis(self.rpc.retry_period_ms),
            call_timeout: Duration::from_millis(self.rpc.timeout_ms),
        }
    }

    pub fn read_retry(&self) -> RetryPolicy {
        RetryPolicy {
            retry_times: self.rpc.read_retry_times,
            retry_period: Duration::from_millis(self.rpc.retry_period_ms),
            call_timeout: Duration::from_millis(self.rpc.timeout_ms),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Master connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterSettings {
    /// Master address (host:port)
    #[serde(default = "default_master_addr")]
    pub addr: String,

    /// Attempts per master call
    #[serde(default = "default_master_retry_times")]
    pub connect_retry_times: u32,

    /// Wait after a transport failure, doubled per attempt
    #[serde(default = "default_master_retry_period")]
    pub connect_retry_period_ms: u64,

    /// Per-call timeout, doubled per attempt
    #[serde(default = "default_master_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_master_addr() -> String {
    "127.0.0.1:10000".to_string()
}

fn default_master_retry_times() -> u32 {
    5
}

fn default_master_retry_period() -> u64 {
    1000
}

fn default_master_timeout() -> u64 {
    5000
}

impl Default for MasterSettings {
    fn default() -> Self {
        Self {
            addr: default_master_addr(),
            connect_retry_times: default_master_retry_times(),
            connect_retry_period_ms: default_master_retry_period(),
            connect_timeout_ms: default_master_timeout(),
        }
    }
}

/// Erasure coding layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErasureSettings {
    /// Data blocks per slice (M)
    pub data_blocks: usize,
    /// Parity blocks per slice (K)
    pub parity_blocks: usize,
    /// Block size in bytes
    pub block_size: usize,
    /// Extra replica rounds for an unsealed tail slice
    pub tail_backup_count: usize,
}

impl Default for ErasureSettings {
    fn default() -> Self {
        Self {
            data_blocks: rsfs_core::DATA_BLOCKS,
            parity_blocks: rsfs_core::PARITY_BLOCKS,
            block_size: rsfs_core::DEFAULT_BLOCK_SIZE,
            tail_backup_count: rsfs_core::DEFAULT_TAIL_BACKUP_COUNT,
        }
    }
}

/// Storage-node RPC settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub write_retry_times: u32,
    pub read_retry_times: u32,
    /// Linear backoff base between retries
    pub retry_period_ms: u64,
    /// Per-call timeout
    pub timeout_ms: u64,
    /// Channel connect timeout
    pub connect_timeout_ms: u64,
    /// Listing page budget
    pub list_size_limit_kb: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            write_retry_times: 3,
            read_retry_times: 3,
            retry_period_ms: 1000,
            timeout_ms: 300_000,
            connect_timeout_ms: 180_000,
            list_size_limit_kb: 1024,
        }
    }
}

/// Fan-out worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Lower bound on runtime worker threads
    pub min_threads: usize,
    /// Concurrent fan-out calls across all sessions
    pub max_threads: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_threads: 1,
            max_threads: 20,
        }
    }
}

/// Fan-out wait budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    pub poll_interval_ms: u64,
    /// Consecutive polls without progress before giving up
    pub max_idle_polls: u32,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_idle_polls: 100,
        }
    }
}

impl WaitSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Bandwidth limit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub enabled: bool,
    pub max_inflow_mb: u64,
    pub max_outflow_mb: u64,
    pub max_pending_buffer_mb: u64,
    pub work_thread_num: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_inflow_mb: 10,
            max_outflow_mb: 10,
            max_pending_buffer_mb: 200,
            work_thread_num: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.master.addr, "127.0.0.1:10000");
        assert_eq!(config.master.connect_retry_times, 5);
        assert_eq!(config.erasure.data_blocks, 10);
        assert_eq!(config.erasure.parity_blocks, 4);
        assert_eq!(config.erasure.block_size, 8192);
        assert_eq!(config.erasure.tail_backup_count, 3);
        assert_eq!(config.rpc.write_retry_times, 3);
        assert_eq!(config.pool.max_threads, 20);
        assert_eq!(config.wait.max_idle_polls, 100);
        assert!(!config.limit.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = ClientConfig::from_toml(
            r#"
            [master]
            addr = "10.0.0.1:9000"

            [erasure]
            data_blocks = 4
            parity_blocks = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.master.addr, "10.0.0.1:9000");
        assert_eq!(config.master.connect_retry_times, 5);
        assert_eq!(config.erasure.data_blocks, 4);
        assert_eq!(config.erasure.block_size, 8192);
        assert_eq!(config.rpc.read_retry_times, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = ClientConfig::from_toml("[erasure]\nparity_blocks = 0\n");
        assert!(matches!(result, Err(RsfsError::Configuration(_))));

        let result = ClientConfig::from_toml("[erasure]\ndata_blocks = 250\nparity_blocks = 10\n");
        assert!(result.is_err());

        let mut config = ClientConfig::default();
        config.pool.max_threads = 0;
        assert!(config.validate().is_err());

        assert!(ClientConfig::from_toml("not = [valid").is_err());
    }

    #[test]
    fn test_tail_backup_count_below_node_count() {
        let mut config = ClientConfig::default();
        config.erasure.tail_backup_count = 13;
        assert!(config.validate().is_ok());

        config.erasure.tail_backup_count = 14;
        assert!(matches!(
            config.validate(),
            Err(RsfsError::Configuration(_))
        ));

        let result = ClientConfig::from_toml(
            "[erasure]\ndata_blocks = 4\nparity_blocks = 2\ntail_backup_count = 6\n",
        );
        assert!(matches!(result, Err(RsfsError::Configuration(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rsfs.toml");
        std::fs::write(&path, "[rpc]\nwrite_retry_times = 7\n").unwrap();
        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.rpc.write_retry_times, 7);

        let fallback = ClientConfig::load_or_default(dir.path().join("missing.toml"));
        assert_eq!(fallback.rpc.write_retry_times, 3);
    }

    #[test]
    fn test_retry_policies() {
        let config = ClientConfig::default();
        let policy = config.write_retry();
        assert_eq!(policy.retry_times, 3);
        assert_eq!(policy.retry_period, Duration::from_secs(1));
        assert_eq!(policy.call_timeout, Duration::from_secs(300));
    }
}
