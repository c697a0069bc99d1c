//! The `contexts` command

use anyhow::Result;
use detector_lib::resolver::{check_connectivity, current_context, list_contexts, short_cluster_name};
use detector_lib::ClusterCli;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use super::build_cli;
use crate::config;
use crate::output::{color_status, print_info, print_table, print_warning, OutputFormat};

/// Row for the contexts table
#[derive(Debug, Tabled, Serialize)]
struct ContextRow {
    #[tabled(rename = "Context")]
    context: String,
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Status")]
    status: String,
}

fn status_label(probe: &std::result::Result<(), String>) -> String {
    match probe {
        Ok(()) => "connected".to_string(),
        Err(reason) => {
            let first_line = reason.lines().next().unwrap_or_default();
            format!("unreachable: {}", first_line)
        }
    }
}

/// List the kubeconfig's contexts, optionally probing each one
pub async fn list(config_path: Option<&Path>, check: bool, format: OutputFormat) -> Result<()> {
    let config = config::load(config_path)?;
    let cli = build_cli(&config).await?;

    let contexts = list_contexts(cli.as_ref()).await;
    if contexts.is_empty() {
        print_warning("No contexts found in kubeconfig");
        return Ok(());
    }
    let current = current_context(cli.as_ref()).await;

    let mut rows = Vec::with_capacity(contexts.len());
    for context in contexts {
        let status = if check {
            let probe = check_connectivity(cli.as_ref(), &context).await;
            match format {
                OutputFormat::Table => {
                    let label = status_label(&probe);
                    match label.split_once(':') {
                        Some((head, tail)) => format!("{}:{}", color_status(head), tail),
                        None => color_status(&label),
                    }
                }
                OutputFormat::Json => status_label(&probe),
            }
        } else {
            "-".to_string()
        };

        let is_current = current.as_deref() == Some(context.as_str());
        rows.push(ContextRow {
            cluster: short_cluster_name(&context),
            current: if is_current { "*".to_string() } else { String::new() },
            context,
            status,
        });
    }

    print_table(&rows, format);
    if matches!(format, OutputFormat::Table) {
        println!();
        print_info(&format!("{} context(s) via {}", rows.len(), cli.tool()));
    }
    Ok(())
}
