//! Cat Command
//!
//! Writes an RSFS file to stdout.

use super::transfer_chunk;
use anyhow::{Context, Result};
use rsfs_client::RsfsClient;
use tokio::io::AsyncWriteExt;

/// Run cat command
pub async fn run(client: &RsfsClient, remote: &str) -> Result<()> {
    let mut file = client
        .open(remote, "r")
        .await
        .with_context(|| format!("Failed to open {remote}"))?;

    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; transfer_chunk(client.config())];
    let copied = async {
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stdout.write_all(&buf[..n]).await?;
        }
        stdout.flush().await?;
        anyhow::Ok(())
    }
    .await;

    let closed = file.close().await;
    copied.with_context(|| format!("Failed to read {remote}"))?;
    closed.with_context(|| format!("Failed to close {remote}"))?;
    Ok(())
}
