//! Output formatting utilities

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use detector_lib::{Finding, ScanRun, SignalKind, SignalTime, DETECTED_KIND};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

/// File written into `--output-dir`
pub const RESULTS_FILE: &str = "oom_results.json";

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// One report row per (finding, kind)
#[derive(Debug, Clone, PartialEq, Eq, Tabled, Serialize)]
pub struct FindingRow {
    #[tabled(rename = "Cluster")]
    pub cluster: String,
    #[tabled(rename = "Namespace")]
    pub namespace: String,
    #[tabled(rename = "Pod")]
    pub pod: String,
    #[tabled(rename = "Type")]
    pub kind: String,
    #[tabled(rename = "Timestamps")]
    pub timestamps: String,
    #[tabled(rename = "Sources")]
    pub sources: String,
    #[tabled(rename = "Description")]
    pub description_file: String,
    #[tabled(rename = "Logs")]
    pub pod_log_file: String,
}

fn kind_rank(kind: &str) -> u8 {
    match kind {
        "OOMKilled" => 0,
        "CrashLoopBackOff" => 1,
        _ => 2,
    }
}

fn join_times<'a>(times: impl Iterator<Item = &'a SignalTime>) -> String {
    let dated: Vec<&str> = times.map(SignalTime::as_str).filter(|t| !t.is_empty()).collect();
    if dated.is_empty() {
        "-".to_string()
    } else {
        dated.join(", ")
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn rows_for(finding: &Finding) -> Vec<FindingRow> {
    let sources = finding
        .sources
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    finding
        .kind_labels()
        .into_iter()
        .map(|kind| {
            let timestamps = if kind == SignalKind::OomKilled.reason() {
                join_times(finding.oom_timestamps.iter())
            } else if kind == SignalKind::CrashLoop.reason() {
                join_times(finding.crash_timestamps.iter())
            } else {
                "-".to_string()
            };
            FindingRow {
                cluster: finding.cluster.clone(),
                namespace: finding.namespace.clone(),
                pod: finding.pod.clone(),
                kind: kind.to_string(),
                timestamps,
                sources: sources.clone(),
                description_file: display_path(&finding.description_file),
                pod_log_file: display_path(&finding.pod_log_file),
            }
        })
        .collect()
}

/// OOMKilled rows first, then CrashLoopBackOff, then presence-only rows;
/// each group sorted by cluster, namespace and pod
pub fn collect_rows(run: &ScanRun) -> Vec<FindingRow> {
    let mut rows: Vec<FindingRow> = run.findings().flat_map(rows_for).collect();
    rows.sort_by(|a, b| {
        (kind_rank(&a.kind), &a.cluster, &a.namespace, &a.pod).cmp(&(
            kind_rank(&b.kind),
            &b.cluster,
            &b.namespace,
            &b.pod,
        ))
    });
    rows
}

fn color_kind(kind: &str) -> String {
    match kind {
        "OOMKilled" => kind.red().bold().to_string(),
        "CrashLoopBackOff" => kind.yellow().bold().to_string(),
        DETECTED_KIND => kind.cyan().to_string(),
        _ => kind.to_string(),
    }
}

/// Print the run in the requested format
pub fn print_run(run: &ScanRun, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(run).context("Failed to serialize results")?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            let mut rows = collect_rows(run);
            if rows.is_empty() {
                print_success("No OOMKilled or CrashLoopBackOff pods found");
            } else {
                for row in &mut rows {
                    row.kind = color_kind(&row.kind);
                }
                let table = Table::new(&rows).with(Style::rounded()).to_string();
                println!("{}", table);
            }

            if !run.skipped.is_empty() {
                println!();
                println!("{}", "Skipped clusters".bold());
                for (cluster, reason) in &run.skipped {
                    print_warning(&format!("{}: {}", cluster, reason));
                }
            }

            println!();
            print_info(&format!(
                "{} finding(s) across {} cluster(s), {} skipped",
                run.finding_count(),
                run.clusters.len(),
                run.skipped.len()
            ));
        }
    }
    Ok(())
}

/// Write the full run as JSON into `dir`
pub fn write_results(run: &ScanRun, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(RESULTS_FILE);
    let json = serde_json::to_string_pretty(run).context("Failed to serialize results")?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a connectivity status
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "connected" => status.green().to_string(),
        "unreachable" => status.red().to_string(),
        _ => status.to_string(),
    }
}
