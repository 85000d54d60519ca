//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tether_core::{config, logging};

mod commands;

use commands::replay::StreamKind;

#[derive(Parser)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Replay agent event streams through a live session")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Write debug-level diagnostics to the log file
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Replays a recorded stream and prints the resulting view
    Replay {
        /// File to replay (JSON lines, or raw text for --kind log)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// What the file contains
        #[arg(long, value_enum, default_value_t = StreamKind::Protocol)]
        kind: StreamKind,

        /// Override the per-tick drain cap from config
        #[arg(long, value_name = "N")]
        max_per_tick: Option<usize>,

        /// Show the whole log panel instead of its tail (--kind log)
        #[arg(long)]
        full: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init_file_logging(&config::paths::log_dir(), cli.debug)
        .context("init logging")?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Replay {
            file,
            kind,
            max_per_tick,
            full,
        } => {
            let config = config::Config::load().context("load config")?;
            commands::replay::run(commands::replay::ReplayOptions {
                file: &file,
                kind,
                max_per_tick,
                full,
                config: &config,
            })
            .await
        }

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
