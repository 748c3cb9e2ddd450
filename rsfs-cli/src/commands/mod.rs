//! CLI Commands

use console::Emoji;

pub mod cat;
pub mod copy;
pub mod get;
pub mod list;
pub mod put;

pub static CHECK: Emoji<'_, '_> = Emoji("\u{2713} ", "[OK] ");

/// Chunk size for streaming transfers: one full slice
pub fn transfer_chunk(config: &rsfs_client::ClientConfig) -> usize {
    (config.erasure.block_size * config.erasure.data_blocks).max(1)
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Progress bar for a transfer of `total` bytes
pub fn transfer_bar(total: u64, message: String) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new(total);
    if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message);
    pb
}
