//! DeltaSync CLI
//!
//! Command-line tools for persisted delta queue journals.
//!
//! # Commands
//!
//! - `inspect` - Display queue statistics
//! - `dump-queue` - List pending deltas
//! - `verify` - Check journal integrity
//! - `compact` - Rewrite the journal to its live entries

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// DeltaSync queue journal tools.
#[derive(Parser)]
#[command(name = "deltasync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the queue journal file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display queue statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending deltas in enqueue order
    DumpQueue {
        /// Maximum number of deltas to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify journal integrity
    Verify,

    /// Rewrite the journal to its live entries
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
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
            let path = cli.path.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::DumpQueue { limit, format } => {
            let path = cli.path.ok_or("Journal path required for dump-queue")?;
            commands::dump_queue::run(&path, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Journal path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Journal path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("DeltaSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Journal format v{}", deltasync_storage::JOURNAL_VERSION);
        }
    }

    Ok(())
}
