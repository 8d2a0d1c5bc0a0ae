//! Changefeed CLI
//!
//! Command-line tools for exercising a changes follower.
//!
//! # Commands
//!
//! - `replay` - Replay a captured change log through a follower
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Changes feed follower tools.
#[derive(Parser)]
#[command(name = "changefeed")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How the replayed follower ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Stop once the log is caught up
    Finite,
    /// Keep following until Ctrl-C
    Listen,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a captured change log through a follower
    Replay {
        /// JSON-lines change log (one {"id","deleted","doc"} object per line)
        log: PathBuf,

        /// Sequence token to start after
        #[arg(short, long, default_value = "0")]
        since: String,

        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<u64>,

        /// Follow mode
        #[arg(short, long, value_enum, default_value = "finite")]
        mode: Mode,

        /// Records requested per fetch
        #[arg(short, long)]
        batch_size: Option<u64>,

        /// Include document bodies
        #[arg(short, long)]
        include_docs: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay {
            log,
            since,
            limit,
            mode,
            batch_size,
            include_docs,
            format,
        } => {
            let options = commands::replay::ReplayOptions {
                since,
                limit,
                mode,
                batch_size,
                include_docs,
                format,
            };
            commands::replay::run(&log, options).await?;
        }
        Commands::Version => {
            println!("Changefeed CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Changefeed protocol batch size {}",
                changefeed_protocol::BATCH_SIZE
            );
        }
    }

    Ok(())
}
