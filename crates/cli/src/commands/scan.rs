//! The `scan` command

use anyhow::{Context, Result};
use detector_lib::{ClusterCli, Orchestrator, ScanMetrics};
use std::path::Path;
use tracing::info;

use super::{build_cli, select_contexts};
use crate::config;
use crate::output::{self, print_success, OutputFormat};
use crate::ScanArgs;

/// Scan the selected contexts and report every flagged pod
pub async fn run_scan(config_path: Option<&Path>, args: &ScanArgs, format: OutputFormat) -> Result<()> {
    let config = config::apply_overrides(config::load(config_path)?, args);

    // Bad patterns and windows fail before any cluster is touched
    config.time_window()?;
    config.namespace_filter()?;

    let cli = build_cli(&config).await?;
    let contexts = select_contexts(cli.as_ref(), args.current, &args.contexts).await?;
    info!(contexts = contexts.len(), tool = %cli.tool(), "Selected contexts");

    let orchestrator = Orchestrator::builder()
        .cli(cli)
        .config(config)
        .build()
        .context("Failed to set up the scan")?;
    let run = orchestrator.run(contexts).await;

    output::print_run(&run, format)?;

    if let Some(dir) = &args.output_dir {
        let path = output::write_results(&run, dir)?;
        if matches!(format, OutputFormat::Table) {
            print_success(&format!("Results written to {}", path.display()));
        }
    }

    if let Some(path) = &args.metrics_file {
        ScanMetrics::new()
            .write_textfile(path)
            .await
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        info!(path = %path.display(), "Metrics written");
    }

    Ok(())
}
