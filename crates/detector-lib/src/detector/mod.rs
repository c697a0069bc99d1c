//! Per-namespace detection
//!
//! One event-list call and one pod-list call per namespace. Event-based
//! signals give point-in-time history; pod-status signals give the current
//! state. Both are merged by pod name into [`Finding`]s.

pub mod events;
pub mod pods;

use crate::cluster::ClusterCli;
use crate::models::{Finding, NamespaceFindings, Signal};
use crate::timestamps::Cutoff;
use events::{classify_events, EventList};
use pods::{crashloop_signals, oom_signals, PodList};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fold signals into per-pod findings.
///
/// Timestamps and sources are sets, so merging the same signals again
/// leaves the findings unchanged.
pub fn merge_signals<'a>(
    findings: &mut NamespaceFindings,
    cluster: &str,
    namespace: &str,
    signals: impl IntoIterator<Item = &'a Signal>,
) {
    for signal in signals {
        findings
            .entry(signal.pod.clone())
            .or_insert_with(|| Finding::new(cluster, namespace, &signal.pod))
            .record(signal.kind, signal.time.clone(), signal.source);
    }
}

/// Runs the event and pod-status extractors for one namespace at a time
pub struct Detector {
    cli: Arc<dyn ClusterCli>,
    cutoff: Option<Cutoff>,
}

impl Detector {
    pub fn new(cli: Arc<dyn ClusterCli>, cutoff: Option<Cutoff>) -> Self {
        Self { cli, cutoff }
    }

    /// Findings for `namespace`, or `None` when nothing fired.
    ///
    /// `None` is what triggers the monitoring fallback.
    pub async fn detect(&self, context: &str, cluster: &str, namespace: &str) -> Option<NamespaceFindings> {
        let cutoff = self.cutoff.as_ref();
        let mut signals = Vec::new();

        if let Some(events) = self
            .fetch::<EventList>(context, namespace, &["get", "events", "--ignore-not-found", "-o", "json"])
            .await
        {
            signals.extend(classify_events(&events, cutoff));
        }

        if let Some(pods) = self
            .fetch::<PodList>(context, namespace, &["get", "pods", "-o", "json", "--ignore-not-found"])
            .await
        {
            signals.extend(oom_signals(&pods, cutoff));
            signals.extend(crashloop_signals(&pods, cutoff));
        }

        let mut findings = NamespaceFindings::new();
        merge_signals(&mut findings, cluster, namespace, &signals);

        debug!(
            cluster = %cluster,
            namespace = %namespace,
            signals = signals.len(),
            pods = findings.len(),
            "Namespace detection complete"
        );

        if findings.is_empty() {
            None
        } else {
            Some(findings)
        }
    }

    /// Run a namespaced list call and decode it; failures mean "no data"
    async fn fetch<T: DeserializeOwned>(&self, context: &str, namespace: &str, args: &[&str]) -> Option<T> {
        let mut argv = vec!["-n", namespace];
        argv.extend_from_slice(args);

        let output = self.cli.run(Some(context), &argv).await;
        if !output.has_output() {
            debug!(namespace = %namespace, command = %args.join(" "), error = %output.error_text(), "No data");
            return None;
        }
        match serde_json::from_str(&output.stdout) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(namespace = %namespace, command = %args.join(" "), error = %e, "Failed to parse JSON");
                None
            }
        }
    }
}
