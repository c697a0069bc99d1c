//! Scan configuration
//!
//! Loaded from an optional file and `OOM_DETECTOR_*` environment variables;
//! the binary layers command-line flags on top. Every field has a default,
//! so an empty source yields a usable configuration.

use crate::error::Result;
use crate::resolver::NamespaceFilter;
use crate::runner::RetryPolicy;
use crate::timestamps::parse_time_range;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `OOM_DETECTOR_NAMESPACE_WORKERS=8`
pub const ENV_PREFIX: &str = "OOM_DETECTOR";

/// Settings for the monitoring fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Namespace holding the monitoring route
    pub namespace: String,
    /// Well-known route name, also used as a substring when listing routes
    pub route_name: String,
    /// Explicit endpoint; skips route discovery when set
    pub url: Option<String>,
    /// Verify the route's TLS certificate (cluster ingress certs are often self-signed)
    pub verify_tls: bool,
    /// HTTP timeout; defaults to the CLI timeout plus ten seconds
    pub timeout_secs: Option<u64>,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            namespace: "openshift-monitoring".to_string(),
            route_name: "prometheus-k8s".to_string(),
            url: None,
            verify_tls: false,
            timeout_secs: None,
        }
    }
}

/// Everything a scan run needs besides the list of contexts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Attempts per external command
    pub retries: u32,
    /// `--request-timeout` passed to the cluster CLI
    pub cli_timeout_secs: u64,
    /// Linear backoff unit between attempts
    pub retry_delay_secs: u64,
    /// Extra time a CLI process gets beyond its request timeout
    pub process_grace_secs: u64,
    /// Clusters scanned concurrently
    pub cluster_parallelism: usize,
    /// Namespaces per batch within a cluster
    pub namespace_batch_size: usize,
    /// Concurrent namespace scans within a batch
    pub namespace_workers: usize,
    /// Regexes; a namespace must match at least one when non-empty
    pub include_namespaces: Vec<String>,
    /// Regexes; a namespace matching any of them is dropped
    pub exclude_namespaces: Vec<String>,
    /// Drop ephemeral test/cluster namespaces before include/exclude
    pub exclude_ephemeral: bool,
    /// Look-back window such as `1d`; unset means no time filter
    pub time_range: Option<String>,
    /// Disable the monitoring fallback entirely
    pub skip_prometheus: bool,
    /// Root for per-cluster artifact directories
    pub artifact_dir: PathBuf,
    pub prometheus: PrometheusConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            cli_timeout_secs: 45,
            retry_delay_secs: 3,
            process_grace_secs: 5,
            cluster_parallelism: 2,
            namespace_batch_size: 10,
            namespace_workers: 5,
            include_namespaces: Vec::new(),
            exclude_namespaces: Vec::new(),
            exclude_ephemeral: true,
            time_range: None,
            skip_prometheus: false,
            artifact_dir: default_artifact_dir(),
            prometheus: PrometheusConfig::default(),
        }
    }
}

fn default_artifact_dir() -> PathBuf {
    std::env::temp_dir().join("oom-detector")
}

impl ScanConfig {
    /// Load from an optional file, then the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("include_namespaces")
                    .with_list_parse_key("exclude_namespaces"),
            )
            .build()?;

        let config: ScanConfig = settings.try_deserialize()?;
        Ok(config.normalized())
    }

    /// Clamp counts that must be at least one
    pub fn normalized(mut self) -> Self {
        self.retries = self.retries.max(1);
        self.cluster_parallelism = self.cluster_parallelism.max(1);
        self.namespace_batch_size = self.namespace_batch_size.max(1);
        self.namespace_workers = self.namespace_workers.max(1);
        self.cli_timeout_secs = self.cli_timeout_secs.max(1);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_secs(self.retry_delay_secs))
    }

    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_timeout_secs)
    }

    pub fn process_grace(&self) -> Duration {
        Duration::from_secs(self.process_grace_secs)
    }

    pub fn prometheus_timeout(&self) -> Duration {
        Duration::from_secs(
            self.prometheus
                .timeout_secs
                .unwrap_or(self.cli_timeout_secs + 10),
        )
    }

    /// The parsed time window, if one is configured
    pub fn time_window(&self) -> Result<Option<Duration>> {
        self.time_range
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(parse_time_range)
            .transpose()
    }

    /// Compile the namespace patterns
    pub fn namespace_filter(&self) -> Result<NamespaceFilter> {
        NamespaceFilter::compile(
            &self.include_namespaces,
            &self.exclude_namespaces,
            self.exclude_ephemeral,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.retries, 3);
        assert_eq!(config.cli_timeout(), Duration::from_secs(45));
        assert_eq!(config.namespace_batch_size, 10);
        assert_eq!(config.namespace_workers, 5);
        assert_eq!(config.cluster_parallelism, 2);
        assert!(config.exclude_ephemeral);
        assert_eq!(config.prometheus_timeout(), Duration::from_secs(55));
        assert_eq!(config.prometheus.route_name, "prometheus-k8s");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
namespace_workers = 8
include_namespaces = ["^team-"]
time_range = "2h"

[prometheus]
url = "https://prom.example.com"
"#
        )
        .unwrap();

        let config = ScanConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.namespace_workers, 8);
        assert_eq!(config.include_namespaces, vec!["^team-".to_string()]);
        assert_eq!(config.time_window().unwrap(), Some(Duration::from_secs(7_200)));
        assert_eq!(config.prometheus.url.as_deref(), Some("https://prom.example.com"));
        // Untouched fields keep their defaults
        assert_eq!(config.retries, 3);
        assert_eq!(config.prometheus.namespace, "openshift-monitoring");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(ScanConfig::load(Some(Path::new("/nonexistent/oom-detector.toml"))).is_err());
    }

    #[test]
    fn test_normalized_clamps_zero_counts() {
        let config = ScanConfig {
            retries: 0,
            namespace_workers: 0,
            namespace_batch_size: 0,
            cluster_parallelism: 0,
            ..ScanConfig::default()
        }
        .normalized();

        assert_eq!(config.retries, 1);
        assert_eq!(config.namespace_workers, 1);
        assert_eq!(config.namespace_batch_size, 1);
        assert_eq!(config.cluster_parallelism, 1);
    }

    #[test]
    fn test_invalid_time_range_surfaces() {
        let config = ScanConfig {
            time_range: Some("soon".to_string()),
            ..ScanConfig::default()
        };
        assert!(config.time_window().is_err());
    }

    #[test]
    fn test_invalid_pattern_surfaces() {
        let config = ScanConfig {
            include_namespaces: vec!["(".to_string()],
            ..ScanConfig::default()
        };
        assert!(config.namespace_filter().is_err());
    }
}
