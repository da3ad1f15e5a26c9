//! Tamanu sync CLI
//!
//! Command-line tools for running and maintaining Tamanu sync stores.
//!
//! # Commands
//!
//! - `serve` - Run the central sync server
//! - `token` - Issue a facility bearer token
//! - `inspect` - Display per-channel store statistics
//! - `compact` - Rewrite a store journal
//! - `sync` - Sync a facility store with a central server

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tamanu sync server and maintenance tools.
#[derive(Parser)]
#[command(name = "tamanu-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the central sync server until Ctrl-C
    Serve {
        /// Store directory (overrides TAMANU_SYNC_DATA_DIR)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Listen address (overrides TAMANU_SYNC_LISTEN_ADDR)
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Keep rows in memory only
        #[arg(long, conflicts_with = "data_dir")]
        in_memory: bool,
    },

    /// Print a facility token signed with TAMANU_SYNC_SECRET
    Token {
        /// Facility id carried by the token
        #[arg(short, long)]
        facility: String,

        /// Token lifetime in hours (overrides TAMANU_SYNC_TOKEN_EXPIRY_HOURS)
        #[arg(short, long)]
        expiry_hours: Option<u64>,
    },

    /// Display per-channel store statistics
    Inspect {
        /// Store directory
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Open as a facility store and show pull watermarks
        #[arg(long)]
        facility: bool,

        /// Output format (text, json)
        #[arg(short = 'F', long, default_value = "text")]
        format: String,
    },

    /// Rewrite the journal to one entry per row and watermark
    Compact {
        /// Store directory
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Open as a facility store
        #[arg(long)]
        facility: bool,
    },

    /// Sync a facility store with a central server
    Sync {
        /// Facility store directory
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Central server URL
        #[arg(short, long)]
        server: String,

        /// Bearer token
        #[arg(short, long, env = "TAMANU_SYNC_TOKEN")]
        token: Option<String>,

        /// Channel to sync; repeat for several (default: every stored channel)
        #[arg(short, long = "channel")]
        channels: Vec<String>,

        /// Conflict policy (server-wins, client-wins, last-write-wins, manual)
        #[arg(short, long, default_value = "server-wins")]
        policy: String,

        /// Keep syncing every N seconds
        #[arg(short, long)]
        interval_secs: Option<u64>,
    },
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let json = std::env::var("TAMANU_SYNC_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve {
            data_dir,
            listen,
            in_memory,
        } => {
            commands::serve::run(data_dir, listen, in_memory)?;
        }
        Commands::Token {
            facility,
            expiry_hours,
        } => {
            commands::token::run(&facility, expiry_hours)?;
        }
        Commands::Inspect {
            data_dir,
            facility,
            format,
        } => {
            commands::inspect::run(&data_dir, facility, &format)?;
        }
        Commands::Compact { data_dir, facility } => {
            commands::compact::run(&data_dir, facility)?;
        }
        Commands::Sync {
            data_dir,
            server,
            token,
            channels,
            policy,
            interval_secs,
        } => {
            commands::sync::run(commands::sync::SyncArgs {
                data_dir: &data_dir,
                server: &server,
                token: token.as_deref(),
                channels: &channels,
                policy: &policy,
                interval_secs,
            })?;
        }
    }

    Ok(())
}
