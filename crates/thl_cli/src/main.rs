//! THL CLI
//!
//! Command-line tools for inspecting and maintaining THL disk logs.
//!
//! # Commands
//!
//! - `info` - Display log bounds, segments and configuration
//! - `list` - Print events in seqno order
//! - `validate` - Verify checksums, ordering and segment linkage
//! - `purge` - Delete events from the start or end of the log

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thl_core::{LogConfig, SerializerKind};
use tracing_subscriber::EnvFilter;

/// THL command-line log tools.
#[derive(Parser)]
#[command(name = "thl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
    #[arg(global = true, short = 'd', long)]
    log_dir: Option<PathBuf>,

    /// Payload serializer the log was written with (binary, json)
    #[arg(global = true, long, default_value = "binary")]
    serializer: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display log bounds, segments and configuration
    Info {
        /// Show per-segment details
        #[arg(short, long)]
        segments: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print events in seqno order
    List {
        /// First seqno to print (defaults to the start of the log)
        #[arg(long)]
        low: Option<i64>,

        /// Last seqno to print (defaults to the end of the log)
        #[arg(long)]
        high: Option<i64>,

        /// Maximum number of events to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print headers only
        #[arg(long)]
        headers_only: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify checksums, ordering and segment linkage
    Validate,

    /// Delete events from the start or end of the log
    Purge {
        /// First seqno to delete (defaults to the start of the log)
        #[arg(long)]
        low: Option<i64>,

        /// Last seqno to delete (defaults to the end of the log)
        #[arg(long)]
        high: Option<i64>,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Show version information
    Version,
}

fn log_config(cli: &Cli, command: &str) -> Result<LogConfig, Box<dyn std::error::Error>> {
    let dir = cli
        .log_dir
        .as_ref()
        .ok_or_else(|| format!("Log directory required for {command}"))?;
    let serializer = match cli.serializer.as_str() {
        "binary" => SerializerKind::Binary,
        "json" => SerializerKind::Json,
        other => return Err(format!("Unknown serializer: {other}").into()),
    };
    Ok(LogConfig::new(dir).serializer(serializer))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
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

    match &cli.command {
        Commands::Info { segments, format } => {
            let config = log_config(&cli, "info")?;
            commands::info::run(config, *segments, format)?;
        }
        Commands::List {
            low,
            high,
            limit,
            headers_only,
            format,
        } => {
            let config = log_config(&cli, "list")?;
            let options = commands::list::ListOptions {
                low: *low,
                high: *high,
                limit: *limit,
                headers_only: *headers_only,
                json: format == "json",
            };
            commands::list::run(config, &options, &mut std::io::stdout().lock())?;
        }
        Commands::Validate => {
            let config = log_config(&cli, "validate")?;
            commands::validate::run(config)?;
        }
        Commands::Purge { low, high, yes } => {
            let config = log_config(&cli, "purge")?;
            commands::purge::run(config, *low, *high, *yes)?;
        }
        Commands::Version => {
            println!("THL CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("THL Core v{}", thl_core::VERSION);
        }
    }

    Ok(())
}
