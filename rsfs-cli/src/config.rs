//! Configuration loading
//!
//! Config directory: ~/.rsfs/
//!
//! Config file format (~/.rsfs/config.toml):
//! ```toml
//! [master]
//! addr = "10.0.0.1:10000"
//!
//! [erasure]
//! data_blocks = 10
//! parity_blocks = 4
//! ```
//!
//! Precedence, lowest first: defaults, config file, `RSFS_*` environment
//! variables, `--master`.

use anyhow::{Context, Result};
use rsfs_client::ClientConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the config directory path (~/.rsfs/)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".rsfs"))
}

/// Get the default config file path
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load the client configuration
///
/// An explicit `path` must exist and parse; the default path silently falls
/// back to defaults when missing.
pub fn load(path: Option<&Path>, master: Option<String>) -> Result<ClientConfig> {
    let config = match path {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => match config_file_path() {
            Ok(path) if path.exists() => ClientConfig::load_or_default(&path),
            _ => ClientConfig::default(),
        },
    };

    let mut config = config.with_env_overrides();
    if let Some(addr) = master {
        config.master.addr = addr;
    }
    config.validate().context("Invalid configuration")?;
    tracing::debug!(path = ?path, master = %config.master.addr, "Configuration loaded");
    Ok(config)
}

/// Write `config` to `path`, creating parent directories
pub fn save(config: &ClientConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Worker threads for the runtime: available cores clamped to the pool bounds
pub fn worker_threads(config: &ClientConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.clamp(config.pool.min_threads.max(1), config.pool.max_threads.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(load(Some(&missing), None).is_err());
    }

    #[test]
    fn test_master_flag_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ClientConfig::default();
        config.master.addr = "10.0.0.1:10000".to_string();
        config.erasure.block_size = 4096;
        save(&config, &path).unwrap();

        let loaded = load(Some(&path), Some("10.0.0.2:10000".to_string())).unwrap();
        assert_eq!(loaded.master.addr, "10.0.0.2:10000");
        assert_eq!(loaded.erasure.block_size, 4096);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[erasure]\ndata_blocks = 0\n").unwrap();
        assert!(load(Some(&path), None).is_err());
    }

    #[test]
    fn test_worker_threads_within_pool_bounds() {
        let mut config = ClientConfig::default();
        config.pool.min_threads = 2;
        config.pool.max_threads = 3;
        let threads = worker_threads(&config);
        assert!((2..=3).contains(&threads));
    }
}
