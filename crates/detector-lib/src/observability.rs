//! Observability for scan runs
//!
//! Provides:
//! - Prometheus counters for clusters, namespaces, findings, fallback queries
//!   and artifact degradations, exportable in the text exposition format
//! - Structured lifecycle logging with tracing

use crate::error::{DetectorError, Result};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram, IntCounter,
    IntCounterVec, TextEncoder,
};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Buckets for whole-run and per-cluster durations (in seconds)
const DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0];

/// Global metrics instance (registered once); `None` if registration failed
static GLOBAL_METRICS: OnceLock<Option<ScanMetricsInner>> = OnceLock::new();

struct ScanMetricsInner {
    clusters_scanned: IntCounter,
    clusters_skipped: IntCounter,
    namespaces_scanned: IntCounter,
    findings: IntCounterVec,
    fallback_queries: IntCounterVec,
    artifact_degradations: IntCounter,
    cluster_scan_seconds: Histogram,
    run_seconds: Histogram,
}

impl ScanMetricsInner {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            clusters_scanned: register_int_counter!(
                "oom_detector_clusters_scanned_total",
                "Clusters that passed the connectivity probe and were scanned"
            )?,
            clusters_skipped: register_int_counter!(
                "oom_detector_clusters_skipped_total",
                "Clusters skipped after a failed connectivity probe"
            )?,
            namespaces_scanned: register_int_counter!(
                "oom_detector_namespaces_scanned_total",
                "Namespaces run through detection"
            )?,
            findings: register_int_counter_vec!(
                "oom_detector_findings_total",
                "Pods flagged, by finding kind",
                &["kind"]
            )?,
            fallback_queries: register_int_counter_vec!(
                "oom_detector_prometheus_fallback_total",
                "Namespaces sent to the Prometheus fallback, by outcome",
                &["outcome"]
            )?,
            artifact_degradations: register_int_counter!(
                "oom_detector_artifact_degraded_writes_total",
                "Artifact files written to a fallback path or lost"
            )?,
            cluster_scan_seconds: register_histogram!(
                "oom_detector_cluster_scan_duration_seconds",
                "Time spent scanning one cluster",
                DURATION_BUCKETS.to_vec()
            )?,
            run_seconds: register_histogram!(
                "oom_detector_run_duration_seconds",
                "Time spent on a whole scan run",
                DURATION_BUCKETS.to_vec()
            )?,
        })
    }
}

/// Handle to the process-wide scan metrics.
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ScanMetrics {
    _private: (),
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match ScanMetricsInner::register() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register scan metrics");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&ScanMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn inc_clusters_scanned(&self) {
        if let Some(m) = self.inner() {
            m.clusters_scanned.inc();
        }
    }

    pub fn inc_clusters_skipped(&self) {
        if let Some(m) = self.inner() {
            m.clusters_skipped.inc();
        }
    }

    pub fn inc_namespaces_scanned(&self) {
        if let Some(m) = self.inner() {
            m.namespaces_scanned.inc();
        }
    }

    /// `kind` is `OOMKilled`, `CrashLoopBackOff` or `Detected`
    pub fn add_findings(&self, kind: &str, count: usize) {
        if let Some(m) = self.inner() {
            m.findings.with_label_values(&[kind]).inc_by(count as u64);
        }
    }

    pub fn record_fallback(&self, hit: bool) {
        if let Some(m) = self.inner() {
            let outcome = if hit { "hit" } else { "miss" };
            m.fallback_queries.with_label_values(&[outcome]).inc();
        }
    }

    pub fn add_artifact_degradations(&self, count: usize) {
        if let Some(m) = self.inner() {
            m.artifact_degradations.inc_by(count as u64);
        }
    }

    pub fn observe_cluster_duration(&self, duration: Duration) {
        if let Some(m) = self.inner() {
            m.cluster_scan_seconds.observe(duration.as_secs_f64());
        }
    }

    pub fn observe_run_duration(&self, duration: Duration) {
        if let Some(m) = self.inner() {
            m.run_seconds.observe(duration.as_secs_f64());
        }
    }

    /// Everything in the default registry, text exposition format
    pub fn render_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Write the exposition to `path` (textfile-collector style)
    pub async fn write_textfile(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DetectorError::io(parent, e))?;
        }
        tokio::fs::write(path, self.render_text())
            .await
            .map_err(|e| DetectorError::io(path, e))
    }
}

/// Structured logger for scan lifecycle events
#[derive(Clone)]
pub struct ScanLogger {
    tool: String,
}

impl ScanLogger {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }

    pub fn log_run_started(&self, contexts: usize, time_range: Option<&str>) {
        info!(
            event = "scan_started",
            tool = %self.tool,
            contexts = contexts,
            time_range = time_range.unwrap_or("all"),
            "Scan started"
        );
    }

    pub fn log_cluster_skipped(&self, cluster: &str, reason: &str) {
        warn!(
            event = "cluster_skipped",
            tool = %self.tool,
            cluster = %cluster,
            reason = %reason,
            "Cluster skipped"
        );
    }

    pub fn log_cluster_finished(&self, cluster: &str, namespaces: usize, findings: usize, duration: Duration) {
        info!(
            event = "cluster_scanned",
            tool = %self.tool,
            cluster = %cluster,
            namespaces = namespaces,
            findings = findings,
            duration_secs = duration.as_secs_f64(),
            "Cluster scan finished"
        );
    }

    pub fn log_namespace_findings(&self, cluster: &str, namespace: &str, pods: usize, via_fallback: bool) {
        let source = if via_fallback { "prometheus" } else { "cluster" };
        info!(
            event = "namespace_findings",
            tool = %self.tool,
            cluster = %cluster,
            namespace = %namespace,
            pods = pods,
            source = source,
            "Flagged pods in namespace"
        );
    }

    pub fn log_artifact_degraded(&self, cluster: &str, namespace: &str, pod: &str, path: &Path) {
        warn!(
            event = "artifact_degraded",
            tool = %self.tool,
            cluster = %cluster,
            namespace = %namespace,
            pod = %pod,
            path = %path.display(),
            "Artifact written to fallback path or lost"
        );
    }

    pub fn log_run_finished(&self, clusters: usize, skipped: usize, findings: usize, duration: Duration) {
        info!(
            event = "scan_finished",
            tool = %self.tool,
            clusters = clusters,
            skipped = skipped,
            findings = findings,
            duration_secs = duration.as_secs_f64(),
            "Scan finished"
        );
    }
}
