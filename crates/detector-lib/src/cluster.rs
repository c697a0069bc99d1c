//! Cluster CLI accessor
//!
//! Wraps `kubectl` or `oc` behind the [`ClusterCli`] trait so the resolver,
//! detector and escalator only deal in subcommands and captured output.

use crate::error::{DetectorError, Result};
use crate::runner::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Timeout for the one-shot `version --client` probes
const DETECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which binary talks to the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliTool {
    Kubectl,
    Oc,
}

impl CliTool {
    pub fn binary(&self) -> &'static str {
        match self {
            CliTool::Kubectl => "kubectl",
            CliTool::Oc => "oc",
        }
    }

    /// Prefer `kubectl`, fall back to `oc`
    pub async fn detect(runner: &CommandRunner) -> Result<CliTool> {
        for tool in [CliTool::Kubectl, CliTool::Oc] {
            // No `--short`: kubectl 1.28 removed it and rejects the flag
            let argv = vec![
                tool.binary().to_string(),
                "version".to_string(),
                "--client".to_string(),
            ];
            let output = runner.run_with_attempts(&argv, 1, DETECT_TIMEOUT).await;
            if output.success() {
                info!(tool = %tool, "Using cluster CLI");
                return Ok(tool);
            }
            debug!(tool = %tool, error = %output.error_text(), "Cluster CLI not usable");
        }
        Err(DetectorError::NoCliTool)
    }
}

impl fmt::Display for CliTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// Capability to run a cluster subcommand and capture its output
#[async_trait]
pub trait ClusterCli: Send + Sync {
    /// The underlying binary; some probes differ between kubectl and oc
    fn tool(&self) -> CliTool;

    /// Run `args`, scoped to `context` when one is given
    async fn run(&self, context: Option<&str>, args: &[&str]) -> CommandOutput;
}

/// [`ClusterCli`] backed by a real `kubectl`/`oc` process per call
#[derive(Debug, Clone)]
pub struct KubectlCli {
    tool: CliTool,
    runner: CommandRunner,
    request_timeout: Duration,
    grace: Duration,
}

impl KubectlCli {
    /// `request_timeout` goes to `--request-timeout`; the process gets
    /// `request_timeout + grace` before it is killed.
    pub fn new(tool: CliTool, runner: CommandRunner, request_timeout: Duration, grace: Duration) -> Self {
        Self {
            tool,
            runner,
            request_timeout,
            grace,
        }
    }

    /// The full argument vector for a subcommand
    pub fn command_line(&self, context: Option<&str>, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 4);
        argv.push(self.tool.binary().to_string());
        argv.push(format!(
            "--request-timeout={}s",
            self.request_timeout.as_secs().max(1)
        ));
        if let Some(ctx) = context.filter(|c| !c.is_empty()) {
            argv.push("--context".to_string());
            argv.push(ctx.to_string());
        }
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    pub fn process_timeout(&self) -> Duration {
        self.request_timeout + self.grace
    }
}

#[async_trait]
impl ClusterCli for KubectlCli {
    fn tool(&self) -> CliTool {
        self.tool
    }

    async fn run(&self, context: Option<&str>, args: &[&str]) -> CommandOutput {
        let argv = self.command_line(context, args);
        self.runner.run(&argv, self.process_timeout()).await
    }
}
