//! Detector library for OOMKilled and CrashLoopBackOff pods
//!
//! This crate provides the core functionality for:
//! - Running cluster CLI commands with retries
//! - Context and namespace discovery with filtering
//! - Per-namespace detection from events and pod status
//! - Prometheus fallback for namespaces with no direct evidence
//! - Diagnostic artifact capture
//! - Bounded concurrent orchestration across clusters

pub mod artifacts;
pub mod cluster;
pub mod config;
pub mod detector;
pub mod error;
pub mod escalator;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod resolver;
pub mod runner;
pub mod timestamps;

#[cfg(test)]
mod testing;

pub use cluster::{CliTool, ClusterCli, KubectlCli};
pub use config::{PrometheusConfig, ScanConfig};
pub use error::{DetectorError, Result};
pub use models::*;
pub use observability::{ScanLogger, ScanMetrics};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use runner::{CommandOutput, CommandRunner, RetryPolicy};
