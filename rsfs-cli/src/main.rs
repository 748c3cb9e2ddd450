//! RSFS CLI
//!
//! Command-line client for the RSFS erasure-coded file store.
//!
//! # Commands
//! - `put` - Upload a local file
//! - `get` - Download a file
//! - `cat` - Print a file to stdout
//! - `ls` - List files under a directory
//! - `cp` - Copy a file between paths
//! - `config` - Show or initialize configuration
//!
//! # Configuration
//! Config file: ~/.rsfs/config.toml (or `--config`)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;

mod commands;
mod config;

use commands::{cat, copy, get, list, put, CHECK};

#[derive(Parser)]
#[command(name = "rsfs")]
#[command(about = "RSFS erasure-coded file store CLI")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.rsfs/config.toml)
    #[arg(long, global = true, env = "RSFS_CONFIG")]
    config: Option<PathBuf>,

    /// Master address (overrides config file)
    #[arg(long, global = true)]
    master: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Put {
        /// Local file
        local: PathBuf,
        /// Destination path, e.g. /rsfs/data/file.bin
        remote: String,
    },

    /// Download a file to local disk
    Get {
        /// Source path
        remote: String,
        /// Local destination
        local: PathBuf,
    },

    /// Print a file to stdout
    Cat {
        /// Source path
        remote: String,
    },

    /// List files under a directory
    Ls {
        /// Directory path
        path: String,

        /// Show sizes and file ids
        #[arg(short, long)]
        long: bool,

        /// Human-readable sizes
        #[arg(short = 'H', long)]
        human_readable: bool,
    },

    /// Copy a file between paths
    Cp {
        /// Source path
        src: String,
        /// Destination path
        dst: String,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Show config file path
    Path,

    /// Write a config file with defaults
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let command = match cli.command {
        Commands::Config { command } => {
            return handle_config_command(command, cli.config, cli.master);
        }
        other => other,
    };

    let cfg = config::load(cli.config.as_deref(), cli.master)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config::worker_threads(&cfg))
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    runtime.block_on(run(command, cfg))
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: Commands, cfg: rsfs_client::ClientConfig) -> Result<()> {
    match command {
        Commands::Put { local, remote } => put::run(&connect(cfg)?, &local, &remote).await,

        Commands::Get { remote, local } => get::run(&connect(cfg)?, &remote, &local).await,

        Commands::Cat { remote } => cat::run(&connect(cfg)?, &remote).await,

        Commands::Ls {
            path,
            long,
            human_readable,
        } => {
            let config = list::ListConfig {
                path,
                long_format: long,
                human_readable,
            };
            list::run(&connect(cfg)?, config).await
        }

        Commands::Cp { src, dst } => {
            let registry = copy::registry(cfg);
            copy::run(&registry, &src, &dst).await
        }

        // Handled before the runtime starts
        Commands::Config { .. } => Ok(()),
    }
}

fn connect(cfg: rsfs_client::ClientConfig) -> Result<rsfs_client::RsfsClient> {
    rsfs_network::connect(cfg).context("Failed to create client")
}

/// Handle config subcommands
fn handle_config_command(
    command: Option<ConfigCommands>,
    explicit: Option<PathBuf>,
    master: Option<String>,
) -> Result<()> {
    let path = match &explicit {
        Some(path) => path.clone(),
        None => config::config_file_path()?,
    };

    match command {
        None | Some(ConfigCommands::Show) => {
            let cfg = config::load(explicit.as_deref().filter(|p| p.exists()), master)?;
            let text = toml::to_string_pretty(&cfg).context("Failed to serialize config")?;
            println!("{}", text);
            println!("{} {}", style("Config file:").dim(), path.display());
            if !path.exists() {
                println!(
                    "{} Run '{}' to create it",
                    style("(not created yet)").yellow(),
                    style("rsfs config init").green()
                );
            }
        }

        Some(ConfigCommands::Path) => {
            println!("{}", path.display());
        }

        Some(ConfigCommands::Init { force }) => {
            if path.exists() && !force {
                println!(
                    "{} Config file already exists at {}",
                    style("!").yellow(),
                    path.display()
                );
                println!("Use --force to overwrite");
                return Ok(());
            }

            config::save(&rsfs_client::ClientConfig::default(), &path)?;
            println!("{}Config file created at {}", CHECK, path.display());
        }
    }

    Ok(())
}
