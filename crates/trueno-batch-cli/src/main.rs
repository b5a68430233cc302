//! trueno-batch CLI - drive batched device copy and chunked compression.
//!
//! # Usage
//!
//! ```bash
//! # Copy five generated buffers in one launch and verify them
//! trueno-batch copy --sizes 1,7,129,51234,12345678
//!
//! # Compress, decompress and report ratio and throughput
//! trueno-batch compress --pattern text --chunk-size 65536
//!
//! # Show the chunk plan as JSON without touching the device
//! trueno-batch --format json plan --sizes 100000,5
//! ```

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]

mod commands;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use trueno_batch_core::BatchConfig;

/// trueno-batch: batched multi-buffer copy and compression
#[derive(Parser)]
#[command(name = "trueno-batch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table")]
    format: output::OutputFormat,

    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy generated buffers with one batched launch
    Copy(commands::CopyArgs),

    /// Compress and decompress generated buffers
    Compress(commands::CompressArgs),

    /// Print the chunk and intermediate-buffer plan
    Plan(commands::PlanArgs),
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<BatchConfig> {
    match path {
        Some(path) => BatchConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(BatchConfig::default()),
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Copy(args) => commands::copy(&args, &config, cli.format),
        Commands::Compress(args) => commands::compress(&args, &config, cli.format),
        Commands::Plan(args) => commands::plan(&args, &config, cli.format),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
