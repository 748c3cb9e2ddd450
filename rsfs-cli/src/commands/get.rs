//! Get Command
//!
//! Downloads an RSFS file to local disk.

use super::{transfer_bar, transfer_chunk, CHECK};
use anyhow::{Context, Result};
use console::style;
use rsfs_client::RsfsClient;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Run get command
pub async fn run(client: &RsfsClient, remote: &str, local: &Path) -> Result<()> {
    let mut file = client
        .open(remote, "r")
        .await
        .with_context(|| format!("Failed to open {remote}"))?;

    let pb = transfer_bar(file.size(), format!("Downloading {remote}"));
    let mut buf = vec![0u8; transfer_chunk(client.config())];
    let copied = async {
        let mut output = File::create(local)
            .await
            .with_context(|| format!("Failed to create {}", local.display()))?;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n]).await?;
            pb.inc(n as u64);
        }
        output.flush().await?;
        anyhow::Ok(())
    }
    .await;

    let size = file.size();
    let (slice, failed) = file.worst_crash();
    let closed = file.close().await;
    copied.with_context(|| format!("Failed to read {remote}"))?;
    closed.with_context(|| format!("Failed to close {remote}"))?;

    pb.finish_and_clear();
    if failed > 0 {
        println!(
            "{} slice {} had {} unreadable blocks and was reconstructed",
            style("Warning:").yellow(),
            slice,
            failed
        );
    }
    println!(
        "{}{} {} -> {} ({} bytes)",
        CHECK,
        style("Downloaded").green().bold(),
        remote,
        local.display(),
        size
    );
    Ok(())
}
