//! Put Command
//!
//! Uploads a local file into RSFS.

use super::{transfer_bar, transfer_chunk, CHECK};
use anyhow::{Context, Result};
use console::style;
use rsfs_client::RsfsClient;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Run put command
pub async fn run(client: &RsfsClient, local: &Path, remote: &str) -> Result<()> {
    let mut input = File::open(local)
        .await
        .with_context(|| format!("Failed to open {}", local.display()))?;
    let total = input.metadata().await?.len();

    let mut file = client
        .open(remote, "w")
        .await
        .with_context(|| format!("Failed to create {remote}"))?;

    let pb = transfer_bar(total, format!("Uploading {}", local.display()));
    let mut buf = vec![0u8; transfer_chunk(client.config())];
    let copied = async {
        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                return anyhow::Ok(());
            }
            file.write(&buf[..n]).await?;
            pb.inc(n as u64);
        }
    }
    .await;

    let size = file.size();
    // Close even after a failed write so the master sees the session end
    let closed = file.close().await;
    copied.with_context(|| format!("Failed to write {remote}"))?;
    closed.with_context(|| format!("Failed to close {remote}"))?;

    pb.finish_and_clear();
    println!(
        "{}{} {} ({} bytes)",
        CHECK,
        style("Uploaded").green().bold(),
        remote,
        size
    );
    Ok(())
}
