//! Configuration discovery and command-line overrides

use anyhow::{Context, Result};
use detector_lib::ScanConfig;
use std::path::{Path, PathBuf};

use crate::ScanArgs;

/// `~/.config/oom-detector/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".config").join("oom-detector").join("config.toml"))
}

/// An explicit path always wins; the default is only used when it exists
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|path| path.exists()),
    }
}

/// Load file + environment configuration
pub fn load(explicit: Option<&Path>) -> Result<ScanConfig> {
    let path = resolve_config_path(explicit);
    ScanConfig::load(path.as_deref()).with_context(|| match &path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration from environment".to_string(),
    })
}

/// Layer command-line flags on top of the loaded configuration
pub fn apply_overrides(mut config: ScanConfig, args: &ScanArgs) -> ScanConfig {
    if let Some(n) = args.cluster_parallelism {
        config.cluster_parallelism = n;
    }
    if let Some(n) = args.ns_batch_size {
        config.namespace_batch_size = n;
    }
    if let Some(n) = args.ns_workers {
        config.namespace_workers = n;
    }
    if let Some(n) = args.retries {
        config.retries = n;
    }
    if let Some(secs) = args.timeout {
        config.cli_timeout_secs = secs;
    }
    if !args.include_ns.is_empty() {
        config.include_namespaces = args.include_ns.clone();
    }
    if !args.exclude_ns.is_empty() {
        config.exclude_namespaces = args.exclude_ns.clone();
    }
    if args.include_ephemeral {
        config.exclude_ephemeral = false;
    }
    if args.time_range.is_some() {
        config.time_range = args.time_range.clone();
    }
    if args.skip_prometheus {
        config.skip_prometheus = true;
    }
    if args.prometheus_url.is_some() {
        config.prometheus.url = args.prometheus_url.clone();
    }
    if let Some(dir) = &args.artifact_dir {
        config.artifact_dir = dir.clone();
    }
    config.normalized()
}
