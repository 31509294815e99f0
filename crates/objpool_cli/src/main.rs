//! objpool CLI
//!
//! Command-line tools for objpool pool files.
//!
//! # Commands
//!
//! - `create` - Create an empty pool
//! - `check` - Check a pool for consistency without modifying it
//! - `inspect` - Display the header, undo log and heap summary
//! - `recover` - Run crash recovery on a pool

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// objpool command-line pool tools.
#[derive(Parser)]
#[command(name = "objpool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the pool file
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
    /// Create an empty pool
    Create {
        /// Layout signature stored in the pool
        #[arg(short, long)]
        layout: String,

        /// Pool size, with an optional K, M or G suffix
        #[arg(short, long, default_value = "8M", value_parser = commands::parse_size)]
        size: u64,

        /// Undo log size, with an optional K, M or G suffix
        #[arg(long, default_value = "256K", value_parser = commands::parse_size)]
        log_size: u64,

        /// Root object size in bytes
        #[arg(long, default_value = "64")]
        root_size: u64,

        /// File permissions, in octal
        #[arg(short, long, default_value = "600", value_parser = commands::parse_mode)]
        mode: u32,
    },

    /// Check a pool for consistency without modifying it
    Check {
        /// Expected layout signature
        #[arg(short, long)]
        layout: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display the pool header, undo log and heap summary
    Inspect {
        /// List pending undo records
        #[arg(short, long)]
        records: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run crash recovery on a pool
    Recover,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Create {
            layout,
            size,
            log_size,
            root_size,
            mode,
        } => {
            let path = cli.path.ok_or("Pool path required for create")?;
            commands::create::run(&path, &layout, size, log_size, root_size, mode)?;
        }
        Commands::Check { layout, format } => {
            let path = cli.path.ok_or("Pool path required for check")?;
            commands::check::run(&path, layout.as_deref(), &format)?;
        }
        Commands::Inspect { records, format } => {
            let path = cli.path.ok_or("Pool path required for inspect")?;
            commands::inspect::run(&path, records, &format)?;
        }
        Commands::Recover => {
            let path = cli.path.ok_or("Pool path required for recover")?;
            commands::recover::run(&path)?;
        }
        Commands::Version => {
            println!("objpool CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("objpool Core v{}", objpool_core::VERSION);
            println!(
                "Pool format v{}.{}",
                objpool_core::FORMAT_MAJOR,
                objpool_core::FORMAT_MINOR
            );
        }
    }

    Ok(())
}
