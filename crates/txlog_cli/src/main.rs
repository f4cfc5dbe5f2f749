//! txlog CLI
//!
//! Command-line tools for transaction log directories.
//!
//! # Commands
//!
//! - `inspect` - Display log files and their headers
//! - `verify` - Read every transaction and check the log is consistent
//! - `dump` - Print committed batches for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// txlog command-line tools.
#[derive(Parser)]
#[command(name = "txlog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Log file name prefix
    #[arg(global = true, short, long, default_value = "transaction.log")]
    base_name: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display log files and their headers
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify log integrity
    Verify,

    /// Dump committed batches for debugging
    Dump {
        /// Maximum number of batches to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip batches of transactions below this id
        #[arg(long, default_value = "0")]
        from_tx: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Log path required for inspect")?;
            commands::inspect::run(&path, &cli.base_name, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Log path required for verify")?;
            commands::verify::run(&path, &cli.base_name)?;
        }
        Commands::Dump {
            limit,
            from_tx,
            format,
        } => {
            let path = cli.path.ok_or("Log path required for dump")?;
            commands::dump::run(&path, &cli.base_name, limit, from_tx, &format)?;
        }
        Commands::Version => {
            println!("txlog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("txlog core v{}", txlog_core::VERSION);
        }
    }

    Ok(())
}
