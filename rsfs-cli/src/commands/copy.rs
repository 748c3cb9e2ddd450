//! Copy Command
//!
//! Copies a file between two paths, each resolved through the backend
//! registry.

use super::CHECK;
use anyhow::{Context, Result};
use console::style;
use rsfs_client::{copy_path, Backend, BackendRegistry, ClientConfig, RSFS_PREFIX};
use std::sync::Arc;

/// Registry serving `/rsfs/` through a gRPC client built on first use
pub fn registry(config: ClientConfig) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(RSFS_PREFIX, move || {
        let client = rsfs_network::connect(config.clone())?;
        Ok(Arc::new(client) as Arc<dyn Backend>)
    });
    registry
}

/// Run cp command
pub async fn run(registry: &BackendRegistry, src: &str, dst: &str) -> Result<()> {
    let copied = copy_path(registry, src, dst)
        .await
        .with_context(|| format!("Failed to copy {src} to {dst}"))?;
    println!(
        "{}{} {} -> {} ({} bytes)",
        CHECK,
        style("Copied").green().bold(),
        src,
        dst,
        copied
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_serves_rsfs_prefix_only() {
        let registry = registry(ClientConfig::default());
        assert_eq!(registry.prefixes().collect::<Vec<_>>(), [RSFS_PREFIX]);
        assert!(registry.resolve("/local/file").is_err());
    }
}
