//! imgate CLI — entry point.
//!
//! # Commands
//!
//! - `imgate gateway [--logs]` — run every enabled channel until Ctrl+C
//! - `imgate channels status` — show channel configuration
//! - `imgate channels test <platform>` — connectivity diagnostics
//! - `imgate channels probe <platform>` — credential check

mod channels_cmd;
mod gateway;
mod helpers;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 📡 imgate — multi-platform IM gateway
#[derive(Parser)]
#[command(name = "imgate", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.imgate/config.json)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (all enabled channels)
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Inspect and diagnose chat channels
    Channels {
        #[command(subcommand)]
        action: channels_cmd::ChannelsCommands,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path: Option<PathBuf> = cli.config.as_deref().map(helpers::expand_tilde);

    match cli.command {
        Commands::Gateway { logs } => {
            init_logging(logs);
            gateway::run(config_path.as_deref()).await
        }
        Commands::Channels { action } => {
            init_logging(false);
            channels_cmd::dispatch(action, config_path.as_deref()).await
        }
    }
}

/// Initialize tracing/logging. `RUST_LOG` wins when set.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("imgate=debug,imgate_core=debug,imgate_channels=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
