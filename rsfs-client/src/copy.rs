//! File copy between backends

use crate::registry::{BackendRegistry, FileHandle};
use rsfs_core::{Result, RsfsError, DEFAULT_BLOCK_SIZE};
use tracing::info;

/// Stream `src` into `dst` in `chunk`-sized pieces; returns bytes copied
pub async fn copy(src: &mut dyn FileHandle, dst: &mut dyn FileHandle, chunk: usize) -> Result<u64> {
    let mut buf = vec![0u8; chunk.max(1)];
    let mut copied = 0u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let mut written = 0;
        while written < n {
            let w = dst.write(&buf[written..n]).await?;
            if w == 0 {
                return Err(RsfsError::WriteFailed(format!(
                    "destination accepted no bytes after {}",
                    copied + written as u64
                )));
            }
            written += w;
        }
        copied += n as u64;
    }
    Ok(copied)
}

/// Copy the file at `src` to `dst`, resolving both through `registry`
///
/// Both handles are closed even when the copy fails; the first error wins.
pub async fn copy_path(registry: &BackendRegistry, src: &str, dst: &str) -> Result<u64> {
    let mut reader = registry.open(src, "r").await?;
    let mut writer = match registry.open(dst, "w").await {
        Ok(writer) => writer,
        Err(e) => {
            let _ = reader.close().await;
            return Err(e);
        }
    };

    let copied = copy(reader.as_mut(), writer.as_mut(), DEFAULT_BLOCK_SIZE).await;
    let closed_dst = writer.close().await;
    let closed_src = reader.close().await;

    let copied = copied?;
    closed_dst?;
    closed_src?;
    info!(src, dst, bytes = copied, "File copied");
    Ok(copied)
}
