//! Subcommands and the cluster setup they share

pub mod contexts;
pub mod scan;

use anyhow::{Context, Result};
use detector_lib::resolver::{current_context, list_contexts, match_contexts_by_substring};
use detector_lib::{CliTool, ClusterCli, CommandRunner, DetectorError, KubectlCli, ScanConfig};
use std::sync::Arc;

/// Detect kubectl/oc and wrap it with the configured retry policy
pub async fn build_cli(config: &ScanConfig) -> Result<Arc<KubectlCli>> {
    let runner = CommandRunner::new(config.retry_policy());
    let tool = CliTool::detect(&runner).await?;
    Ok(Arc::new(KubectlCli::new(
        tool,
        runner,
        config.cli_timeout(),
        config.process_grace(),
    )))
}

/// `--current`, `--contexts a,b` or every context in the kubeconfig
pub async fn select_contexts(cli: &dyn ClusterCli, current: bool, substrings: &[String]) -> Result<Vec<String>> {
    let contexts = if current {
        current_context(cli)
            .await
            .map(|ctx| vec![ctx])
            .ok_or(DetectorError::NoContexts)
            .context("No current context is set")?
    } else {
        let available = list_contexts(cli).await;
        if substrings.is_empty() {
            available
        } else {
            match_contexts_by_substring(substrings, &available)?
        }
    };

    if contexts.is_empty() {
        return Err(DetectorError::NoContexts.into());
    }
    Ok(contexts)
}
