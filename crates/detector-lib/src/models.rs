//! Core data models for a scan run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Where a signal for a pod came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SignalSource {
    /// Namespace event log
    #[serde(rename = "events")]
    Events,
    /// Pod status (containerStatuses / initContainerStatuses / phase)
    #[serde(rename = "pod-status")]
    PodStatus,
    /// Instant query against the cluster monitoring stack
    #[serde(rename = "prometheus")]
    Prometheus,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Events => "events",
            SignalSource::PodStatus => "pod-status",
            SignalSource::Prometheus => "prometheus",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of failure a signal points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "OOMKilled")]
    OomKilled,
    #[serde(rename = "CrashLoopBackOff")]
    CrashLoop,
}

impl SignalKind {
    /// Reason string as it appears in Kubernetes and Prometheus labels
    pub fn reason(&self) -> &'static str {
        match self {
            SignalKind::OomKilled => "OOMKilled",
            SignalKind::CrashLoop => "CrashLoopBackOff",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// When a signal was observed.
///
/// `Unknown` marks a signal without a usable time (a waiting-state crash loop,
/// a heuristic hit). It sorts before every dated entry and serializes as `""`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SignalTime {
    Unknown,
    At(String),
}

impl SignalTime {
    pub fn at(ts: impl Into<String>) -> Self {
        let ts = ts.into();
        if ts.is_empty() {
            SignalTime::Unknown
        } else {
            SignalTime::At(ts)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SignalTime::Unknown => "",
            SignalTime::At(ts) => ts,
        }
    }
}

impl From<String> for SignalTime {
    fn from(value: String) -> Self {
        SignalTime::at(value)
    }
}

impl From<SignalTime> for String {
    fn from(value: SignalTime) -> Self {
        match value {
            SignalTime::Unknown => String::new(),
            SignalTime::At(ts) => ts,
        }
    }
}

/// A single observation produced by one of the detection sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub pod: String,
    pub kind: SignalKind,
    pub time: SignalTime,
    pub source: SignalSource,
}

impl Signal {
    pub fn new(pod: impl Into<String>, kind: SignalKind, time: SignalTime, source: SignalSource) -> Self {
        Self {
            pod: pod.into(),
            kind,
            time,
            source,
        }
    }
}

/// Aggregated evidence for one pod, keyed by (cluster, namespace, pod)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub cluster: String,
    pub namespace: String,
    pub pod: String,
    pub oom_timestamps: BTreeSet<SignalTime>,
    pub crash_timestamps: BTreeSet<SignalTime>,
    pub sources: BTreeSet<SignalSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_log_file: Option<PathBuf>,
}

impl Finding {
    pub fn new(cluster: impl Into<String>, namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            pod: pod.into(),
            oom_timestamps: BTreeSet::new(),
            crash_timestamps: BTreeSet::new(),
            sources: BTreeSet::new(),
            description_file: None,
            pod_log_file: None,
        }
    }

    /// Fold a dated (or undated) signal into this finding
    pub fn record(&mut self, kind: SignalKind, time: SignalTime, source: SignalSource) {
        match kind {
            SignalKind::OomKilled => self.oom_timestamps.insert(time),
            SignalKind::CrashLoop => self.crash_timestamps.insert(time),
        };
        self.sources.insert(source);
    }

    /// Record presence only, without any timestamp entry
    pub fn mark_source(&mut self, source: SignalSource) {
        self.sources.insert(source);
    }

    /// A finding is only meaningful if something fired for it
    pub fn has_signal(&self) -> bool {
        !self.oom_timestamps.is_empty() || !self.crash_timestamps.is_empty() || !self.sources.is_empty()
    }

    pub fn is_oom(&self) -> bool {
        !self.oom_timestamps.is_empty()
    }

    pub fn is_crash_loop(&self) -> bool {
        !self.crash_timestamps.is_empty()
    }

    /// Report kinds, one per row: `OOMKilled` and/or `CrashLoopBackOff`,
    /// or [`DETECTED_KIND`] for a presence-only finding
    pub fn kind_labels(&self) -> Vec<&'static str> {
        let mut kinds = Vec::with_capacity(2);
        if self.is_oom() {
            kinds.push(SignalKind::OomKilled.reason());
        }
        if self.is_crash_loop() {
            kinds.push(SignalKind::CrashLoop.reason());
        }
        if kinds.is_empty() {
            kinds.push(DETECTED_KIND);
        }
        kinds
    }
}

/// Kind reported for findings that carry a source but no timestamps
pub const DETECTED_KIND: &str = "Detected";

/// Findings of one namespace, keyed by pod name
pub type NamespaceFindings = BTreeMap<String, Finding>;

/// Findings of one cluster, keyed by namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterResult {
    pub namespaces: BTreeMap<String, NamespaceFindings>,
}

impl ClusterResult {
    pub fn insert(&mut self, namespace: impl Into<String>, findings: NamespaceFindings) {
        self.namespaces.insert(namespace.into(), findings);
    }

    pub fn finding_count(&self) -> usize {
        self.namespaces.values().map(|pods| pods.len()).sum()
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.namespaces.values().flat_map(|pods| pods.values())
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

/// Run-level metadata carried into exports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The result of one invocation: per-cluster findings plus skipped clusters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRun {
    pub clusters: BTreeMap<String, ClusterResult>,
    pub skipped: BTreeMap<String, String>,
    pub metadata: ScanMetadata,
}

impl ScanRun {
    pub fn finding_count(&self) -> usize {
        self.clusters.values().map(ClusterResult::finding_count).sum()
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.clusters.values().flat_map(ClusterResult::findings)
    }
}

/// A namespace as returned by the cluster, with the labels used for
/// ephemeral detection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl NamespaceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}
