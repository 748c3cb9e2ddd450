//! List Command
//!
//! Lists files under an RSFS directory.

use super::format_bytes;
use anyhow::{Context, Result};
use console::style;
use rsfs_client::RsfsClient;
use rsfs_core::FileMeta;

/// List configuration
pub struct ListConfig {
    pub path: String,
    pub long_format: bool,
    pub human_readable: bool,
}

/// Run list command
pub async fn run(client: &RsfsClient, config: ListConfig) -> Result<()> {
    let files = client
        .list(&config.path)
        .await
        .with_context(|| format!("Failed to list {}", config.path))?;

    if files.is_empty() {
        println!("{} No files under '{}'", style("Info:").cyan(), config.path);
        return Ok(());
    }

    if config.long_format {
        println!(
            "{:<48} {:>12} {:>8}",
            style("NAME").bold(),
            style("SIZE").bold(),
            style("FID").bold()
        );
        println!("{}", "-".repeat(70));
    }

    for meta in &files {
        if config.long_format {
            println!("{}", long_line(meta, config.human_readable));
        } else {
            println!("{}", meta.name);
        }
    }

    if config.long_format {
        let total: u64 = files.iter().map(|m| m.file_size).sum();
        println!("{}", "-".repeat(70));
        println!(
            "{} files, {} total",
            style(files.len()).green(),
            if config.human_readable {
                format_bytes(total)
            } else {
                format!("{} bytes", total)
            }
        );
    }

    Ok(())
}

fn long_line(meta: &FileMeta, human_readable: bool) -> String {
    let size = if human_readable {
        format_bytes(meta.file_size)
    } else {
        meta.file_size.to_string()
    };
    format!(
        "{:<48} {:>12} {:>8}",
        truncate_name(&meta.name, 48),
        size,
        meta.fid
    )
}

/// Truncate a name for display, keeping its end
fn truncate_name(name: &str, max_len: usize) -> String {
    let chars = name.chars().count();
    if chars <= max_len {
        name.to_string()
    } else {
        let tail: String = name.chars().skip(chars - (max_len - 3)).collect();
        format!("...{}", tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("/rsfs/a", 48), "/rsfs/a");
        assert_eq!(
            truncate_name("/rsfs/this/is/a/very/long/path/file.txt", 20),
            "...ong/path/file.txt"
        );
    }
}
