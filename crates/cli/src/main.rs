//! OOM Detector CLI
//!
//! Scans every (or a selected set of) kubeconfig contexts for pods that were
//! OOMKilled or are crash-looping, captures diagnostics for each one and
//! prints a report.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use commands::{contexts, scan};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// OOMKilled / CrashLoopBackOff detector
#[derive(Parser)]
#[command(name = "oom-detector")]
#[command(author, version, about = "Find OOMKilled and CrashLoopBackOff pods across clusters", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ~/.config/oom-detector/config.toml when present)
    #[arg(long, global = true, env = "OOM_DETECTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Log format on stderr
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan clusters for OOMKilled and CrashLoopBackOff pods
    Scan(ScanArgs),

    /// List available contexts
    Contexts {
        /// Probe each context's connectivity
        #[arg(long)]
        check: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct ScanArgs {
    /// Only scan the current context
    #[arg(long, conflicts_with = "contexts")]
    pub current: bool,

    /// Comma-separated substrings, each matching exactly one context
    #[arg(long, value_delimiter = ',')]
    pub contexts: Vec<String>,

    /// Clusters scanned concurrently
    #[arg(long)]
    pub cluster_parallelism: Option<usize>,

    /// Namespaces per batch
    #[arg(long)]
    pub ns_batch_size: Option<usize>,

    /// Concurrent namespace scans within a batch
    #[arg(long)]
    pub ns_workers: Option<usize>,

    /// Comma-separated regexes; namespaces must match at least one
    #[arg(long, value_delimiter = ',')]
    pub include_ns: Vec<String>,

    /// Comma-separated regexes; matching namespaces are dropped
    #[arg(long, value_delimiter = ',')]
    pub exclude_ns: Vec<String>,

    /// Keep ephemeral test/cluster namespaces
    #[arg(long)]
    pub include_ephemeral: bool,

    /// Attempts per cluster command
    #[arg(long)]
    pub retries: Option<u32>,

    /// Request timeout in seconds for cluster commands
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Only report signals newer than this (e.g. 30m, 2h, 1d, 1M)
    #[arg(long)]
    pub time_range: Option<String>,

    /// Disable the Prometheus fallback
    #[arg(long)]
    pub skip_prometheus: bool,

    /// Query this Prometheus URL instead of discovering the route
    #[arg(long)]
    pub prometheus_url: Option<String>,

    /// Root directory for pod descriptions and logs
    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    /// Also write oom_results.json into this directory
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Write Prometheus text-format metrics to this file after the run
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Scan(args) => {
            scan::run_scan(cli.config.as_deref(), &args, cli.format).await?;
        }
        Commands::Contexts { check } => {
            contexts::list(cli.config.as_deref(), check, cli.format).await?;
        }
    }

    Ok(())
}
