//! Scan orchestration
//!
//! Two levels of bounded concurrency. Clusters run under a
//! replace-on-completion discipline: whenever one finishes, the next pending
//! context starts. Namespaces within a cluster run in fixed-size batches,
//! each drained completely before the next starts, with at most
//! `namespace_workers` in flight. Each namespace builds its findings locally
//! and hands them back whole.

use crate::artifacts::{write_cluster_summary, ArtifactCollector};
use crate::cluster::ClusterCli;
use crate::config::ScanConfig;
use crate::detector::Detector;
use crate::error::{DetectorError, Result};
use crate::escalator::{Escalator, HttpMonitoringClient, MonitoringClient};
use crate::models::{ClusterResult, NamespaceFindings, ScanMetadata, ScanRun};
use crate::observability::{ScanLogger, ScanMetrics};
use crate::resolver::{check_connectivity, list_namespaces, short_cluster_name, NamespaceFilter};
use crate::timestamps::Cutoff;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How one cluster's scan ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOutcome {
    Scanned(ClusterResult),
    /// Connectivity probe failed; carries the reason
    Skipped(String),
}

struct Shared {
    cli: Arc<dyn ClusterCli>,
    monitoring: Option<Arc<dyn MonitoringClient>>,
    config: ScanConfig,
    filter: NamespaceFilter,
    detector: Detector,
    artifacts: ArtifactCollector,
    metrics: ScanMetrics,
    logger: ScanLogger,
}

/// Drives a scan over a set of contexts
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    cli: Option<Arc<dyn ClusterCli>>,
    monitoring: Option<Arc<dyn MonitoringClient>>,
    config: ScanConfig,
    now: Option<DateTime<Utc>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            cli: None,
            monitoring: None,
            config: ScanConfig::default(),
            now: None,
        }
    }

    /// Set the cluster CLI accessor
    pub fn cli(mut self, cli: Arc<dyn ClusterCli>) -> Self {
        self.cli = Some(cli);
        self
    }

    /// Set the scan configuration
    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the monitoring client (defaults to HTTPS via reqwest)
    pub fn monitoring_client(mut self, client: Arc<dyn MonitoringClient>) -> Self {
        self.monitoring = Some(client);
        self
    }

    /// Reference time for the time-range cutoff (defaults to now)
    pub fn now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let cli = self.cli.ok_or(DetectorError::MissingComponent("cluster CLI"))?;
        let config = self.config.normalized();
        let filter = config.namespace_filter()?;
        let cutoff = config
            .time_window()?
            .map(|window| Cutoff::before(self.now.unwrap_or_else(Utc::now), window));

        let monitoring = if config.skip_prometheus {
            None
        } else {
            match self.monitoring {
                Some(client) => Some(client),
                None => Some(Arc::new(HttpMonitoringClient::new(
                    config.prometheus_timeout(),
                    config.prometheus.verify_tls,
                )?) as Arc<dyn MonitoringClient>),
            }
        };

        let shared = Shared {
            detector: Detector::new(cli.clone(), cutoff),
            artifacts: ArtifactCollector::new(config.artifact_dir.clone(), cli.clone()),
            logger: ScanLogger::new(cli.tool().binary()),
            metrics: ScanMetrics::new(),
            cli,
            monitoring,
            filter,
            config,
        };
        Ok(Orchestrator {
            shared: Arc::new(shared),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &ScanConfig {
        &self.shared.config
    }

    /// Scan every context and collect the results.
    ///
    /// Never fails: unreachable clusters land in `skipped`, and everything
    /// else degrades to "no findings" for the affected call.
    pub async fn run(&self, contexts: Vec<String>) -> ScanRun {
        let started_at = Utc::now();
        let clock = Instant::now();
        let shared = &self.shared;
        shared
            .logger
            .log_run_started(contexts.len(), shared.config.time_range.as_deref());

        let mut clusters = BTreeMap::new();
        let mut skipped = BTreeMap::new();

        let mut pending = contexts.into_iter();
        let mut running = JoinSet::new();
        for context in pending.by_ref().take(shared.config.cluster_parallelism) {
            running.spawn(self.clone().scan_cluster_isolated(context));
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((cluster, ClusterOutcome::Scanned(result))) => {
                    clusters.insert(cluster, result);
                }
                Ok((cluster, ClusterOutcome::Skipped(reason))) => {
                    skipped.insert(cluster, reason);
                }
                Err(e) => warn!(error = %e, "Cluster scan task failed"),
            }
            if let Some(context) = pending.next() {
                running.spawn(self.clone().scan_cluster_isolated(context));
            }
        }

        let run = ScanRun {
            clusters,
            skipped,
            metadata: ScanMetadata {
                time_range: shared.config.time_range.clone(),
                started_at,
                finished_at: Utc::now(),
            },
        };

        let elapsed = clock.elapsed();
        shared.metrics.observe_run_duration(elapsed);
        shared
            .logger
            .log_run_finished(run.clusters.len(), run.skipped.len(), run.finding_count(), elapsed);
        run
    }

    /// [`Self::scan_cluster`] on its own task; a panic becomes a skip
    async fn scan_cluster_isolated(self, context: String) -> (String, ClusterOutcome) {
        let cluster = short_cluster_name(&context);
        match tokio::spawn(self.clone().scan_cluster(context)).await {
            Ok(done) => done,
            Err(e) => {
                let reason = format!("Cluster {cluster} scan failed: {e}");
                self.shared.metrics.inc_clusters_skipped();
                self.shared.logger.log_cluster_skipped(&cluster, &reason);
                (cluster, ClusterOutcome::Skipped(reason))
            }
        }
    }

    /// Probe, list namespaces, then scan them batch by batch
    pub async fn scan_cluster(self, context: String) -> (String, ClusterOutcome) {
        let shared = &self.shared;
        let cluster = short_cluster_name(&context);
        let clock = Instant::now();

        if let Err(reason) = check_connectivity(shared.cli.as_ref(), &context).await {
            let reason = format!("Cluster {cluster} unreachable or auth/connectivity failure: {reason}");
            shared.metrics.inc_clusters_skipped();
            shared.logger.log_cluster_skipped(&cluster, &reason);
            return (cluster, ClusterOutcome::Skipped(reason));
        }

        let namespaces = list_namespaces(shared.cli.as_ref(), &context, &shared.filter).await;
        info!(cluster = %cluster, context = %context, namespaces = namespaces.len(), "Scanning cluster");

        let escalator = shared.monitoring.as_ref().map(|client| {
            Arc::new(Escalator::new(
                shared.cli.clone(),
                client.clone(),
                shared.config.prometheus.clone(),
                context.clone(),
                cluster.clone(),
            ))
        });

        let workers = Arc::new(Semaphore::new(shared.config.namespace_workers));
        let mut result = ClusterResult::default();
        let batch_size = shared.config.namespace_batch_size;
        let batch_count = namespaces.len().div_ceil(batch_size);

        for (index, batch) in namespaces.chunks(batch_size).enumerate() {
            debug!(cluster = %cluster, batch = index + 1, of = batch_count, size = batch.len(), "Namespace batch");

            let mut tasks = JoinSet::new();
            for namespace in batch {
                let this = self.clone();
                let workers = workers.clone();
                let escalator = escalator.clone();
                let context = context.clone();
                let cluster = cluster.clone();
                let namespace = namespace.clone();
                tasks.spawn(async move {
                    let _permit = workers.acquire_owned().await.ok();
                    let findings = this
                        .scan_namespace(escalator.as_deref(), &context, &cluster, &namespace)
                        .await;
                    (namespace, findings)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((namespace, Some(findings))) => result.insert(namespace, findings),
                    Ok((_, None)) => {}
                    Err(e) => warn!(cluster = %cluster, error = %e, "Namespace scan task failed"),
                }
            }
        }

        if let Err(e) = write_cluster_summary(shared.artifacts.root(), &cluster, &result).await {
            warn!(cluster = %cluster, error = %e, "Could not write cluster summary");
        }

        let elapsed = clock.elapsed();
        shared.metrics.inc_clusters_scanned();
        shared.metrics.observe_cluster_duration(elapsed);
        shared
            .logger
            .log_cluster_finished(&cluster, namespaces.len(), result.finding_count(), elapsed);
        (cluster, ClusterOutcome::Scanned(result))
    }

    /// Detect, fall back to monitoring if nothing fired, then capture artifacts
    pub async fn scan_namespace(
        &self,
        escalator: Option<&Escalator>,
        context: &str,
        cluster: &str,
        namespace: &str,
    ) -> Option<NamespaceFindings> {
        let shared = &self.shared;
        shared.metrics.inc_namespaces_scanned();

        let (mut findings, via_fallback) = match self.detect_isolated(context, cluster, namespace).await {
            Some(findings) => (findings, false),
            None => {
                let found = escalator?.escalate(namespace).await;
                shared.metrics.record_fallback(found.is_some());
                (found?, true)
            }
        };

        for finding in findings.values_mut() {
            let pair = shared
                .artifacts
                .capture(context, cluster, namespace, &finding.pod)
                .await;

            let degraded = pair.degraded_writes();
            if degraded > 0 {
                shared.metrics.add_artifact_degradations(degraded);
                for slot in [&pair.description, &pair.log] {
                    if slot.write.is_degraded() {
                        shared
                            .logger
                            .log_artifact_degraded(cluster, namespace, &finding.pod, slot.write.path());
                    }
                }
            }

            finding.description_file = Some(pair.description.write.path().to_path_buf());
            finding.pod_log_file = Some(pair.log.write.path().to_path_buf());

            for kind in finding.kind_labels() {
                shared.metrics.add_findings(kind, 1);
            }
        }

        shared
            .logger
            .log_namespace_findings(cluster, namespace, findings.len(), via_fallback);
        Some(findings)
    }

    /// Direct detection on its own task; a panic counts as no evidence so
    /// the namespace still reaches the fallback
    async fn detect_isolated(&self, context: &str, cluster: &str, namespace: &str) -> Option<NamespaceFindings> {
        let this = self.clone();
        let (ctx, cl, ns) = (context.to_string(), cluster.to_string(), namespace.to_string());
        let task = tokio::spawn(async move { this.shared.detector.detect(&ctx, &cl, &ns).await });
        match task.await {
            Ok(findings) => findings,
            Err(e) => {
                warn!(cluster = %cluster, namespace = %namespace, error = %e, "Namespace detection failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::CliTool;
    use crate::escalator::{promql, MetricLabels, PrometheusTarget};
    use crate::models::{SignalKind, SignalSource};
    use crate::runner::CommandOutput;
    use crate::testing::ScriptedCli;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const EMPTY: &str = r#"{"items":[]}"#;

    /// Monitoring client answering OOM queries from a fixed map
    struct FixedMonitoring {
        oom_pods: HashMap<String, Vec<String>>,
        queried: Mutex<Vec<String>>,
    }

    impl FixedMonitoring {
        fn new(oom_pods: &[(&str, &str)]) -> Self {
            let mut map: HashMap<String, Vec<String>> = HashMap::new();
            for (ns, pod) in oom_pods {
                map.entry(promql(SignalKind::OomKilled, ns))
                    .or_default()
                    .push(pod.to_string());
            }
            Self {
                oom_pods: map,
                queried: Mutex::new(Vec::new()),
            }
        }

        fn queried(&self) -> Vec<String> {
            self.queried.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MonitoringClient for FixedMonitoring {
        async fn instant_query(&self, _target: &PrometheusTarget, query: &str) -> Result<Vec<MetricLabels>> {
            self.queried.lock().unwrap().push(query.to_string());
            Ok(self
                .oom_pods
                .get(query)
                .into_iter()
                .flatten()
                .map(|pod| MetricLabels::from([("pod".to_string(), pod.clone())]))
                .collect())
        }
    }

    fn config(dir: &TempDir) -> ScanConfig {
        ScanConfig {
            artifact_dir: dir.path().to_path_buf(),
            exclude_ephemeral: true,
            ..ScanConfig::default()
        }
    }

    fn namespaces(names: &[&str]) -> String {
        let items: Vec<_> = names
            .iter()
            .map(|n| serde_json::json!({"metadata": {"name": n}}))
            .collect();
        serde_json::json!({ "items": items }).to_string()
    }

    fn base_cli() -> ScriptedCli {
        ScriptedCli::new(CliTool::Oc)
            .respond("whoami", CommandOutput::ok("admin"))
            .respond("whoami --show-token", CommandOutput::ok("tok"))
            .respond(
                "-n openshift-monitoring get route prometheus-k8s -o jsonpath={.spec.host} --ignore-not-found",
                CommandOutput::ok("prom.example.com"),
            )
            .respond("-n quiet get events --ignore-not-found -o json", CommandOutput::ok(EMPTY))
            .respond("-n quiet get pods -o json --ignore-not-found", CommandOutput::ok(EMPTY))
            .respond("-n cache get events --ignore-not-found -o json", CommandOutput::ok(EMPTY))
            .respond("-n cache get pods -o json --ignore-not-found", CommandOutput::ok(EMPTY))
            .respond(
                "-n build get events --ignore-not-found -o json",
                CommandOutput::ok(
                    r#"{"items":[{"reason":"OOMKilling","involvedObject":{"name":"build-1"},
                        "lastTimestamp":"2024-01-01T00:00:00Z"}]}"#,
                ),
            )
            .respond("-n build get pods -o json --ignore-not-found", CommandOutput::ok(EMPTY))
            .respond("-n cache describe pod cache-3", CommandOutput::ok("Name: cache-3"))
            .respond("-n cache logs cache-3", CommandOutput::ok("log line"))
            .respond("-n build describe pod build-1", CommandOutput::ok("Name: build-1"))
            .respond("-n build logs build-1 --previous", CommandOutput::ok("killed"))
    }

    #[tokio::test]
    async fn test_builder_requires_cli() {
        assert!(Orchestrator::builder().build().is_err());
    }

    #[tokio::test]
    async fn test_full_run_with_fallback_and_skip() {
        let dir = TempDir::new().unwrap();
        let cli = Arc::new(
            base_cli()
                .respond_for(
                    "ctx-ok",
                    "get ns -o json",
                    CommandOutput::ok(namespaces(&["build", "cache", "quiet", "test-e2e-1"])),
                )
                .respond_for("ctx-down", "whoami", CommandOutput::new(1, "", "Unauthorized")),
        );
        let monitoring = Arc::new(FixedMonitoring::new(&[("cache", "cache-3")]));

        let orchestrator = Orchestrator::builder()
            .cli(cli.clone())
            .monitoring_client(monitoring.clone())
            .config(config(&dir))
            .build()
            .unwrap();

        let run = orchestrator
            .run(vec!["ctx-ok".to_string(), "ctx-down".to_string()])
            .await;

        assert_eq!(
            run.skipped["ctx-down"],
            "Cluster ctx-down unreachable or auth/connectivity failure: Unauthorized"
        );
        let result = &run.clusters["ctx-ok"];
        assert_eq!(result.namespaces.len(), 2);

        let build = &result.namespaces["build"]["build-1"];
        assert!(build.sources.contains(&SignalSource::Events));
        assert!(build.description_file.as_ref().unwrap().exists());
        let log = std::fs::read_to_string(build.pod_log_file.as_ref().unwrap()).unwrap();
        assert_eq!(log, "killed");

        let cache = &result.namespaces["cache"]["cache-3"];
        assert_eq!(cache.sources.iter().copied().collect::<Vec<_>>(), vec![SignalSource::Prometheus]);
        assert!(cache.oom_timestamps.is_empty());
        assert!(cache.description_file.as_ref().unwrap().exists());

        // Only namespaces with no detection reach the fallback, ephemeral ones are never listed
        let queried = monitoring.queried();
        assert!(queried.iter().any(|q| q.contains(r#"namespace="cache""#)));
        assert!(queried.iter().any(|q| q.contains(r#"namespace="quiet""#)));
        assert!(!queried.iter().any(|q| q.contains(r#"namespace="build""#)));
        assert_eq!(cli.count_calls("test-e2e-1"), 0);

        assert!(dir.path().join("ctx-ok.json").exists());
        assert_eq!(run.finding_count(), 2);
    }

    #[tokio::test]
    async fn test_skip_prometheus_never_queries() {
        let dir = TempDir::new().unwrap();
        let cli = Arc::new(base_cli().respond("get ns -o json", CommandOutput::ok(namespaces(&["cache"]))));
        let monitoring = Arc::new(FixedMonitoring::new(&[("cache", "cache-3")]));

        let orchestrator = Orchestrator::builder()
            .cli(cli.clone())
            .monitoring_client(monitoring.clone())
            .config(ScanConfig {
                skip_prometheus: true,
                ..config(&dir)
            })
            .build()
            .unwrap();

        let run = orchestrator.run(vec!["ctx".to_string()]).await;
        assert_eq!(run.finding_count(), 0);
        assert!(monitoring.queried().is_empty());
        assert_eq!(cli.count_calls("--show-token"), 0);
    }

    #[tokio::test]
    async fn test_failed_namespace_listing_is_not_a_skip() {
        let dir = TempDir::new().unwrap();
        let cli = Arc::new(ScriptedCli::new(CliTool::Oc).respond("whoami", CommandOutput::ok("admin")));

        let orchestrator = Orchestrator::builder()
            .cli(cli)
            .config(ScanConfig {
                skip_prometheus: true,
                ..config(&dir)
            })
            .build()
            .unwrap();

        let run = orchestrator.run(vec!["ctx".to_string()]).await;
        assert!(run.skipped.is_empty());
        assert!(run.clusters["ctx"].is_empty());
    }

    /// Panics on one scripted call and answers everything else from `inner`
    struct PanickyCli {
        inner: ScriptedCli,
        context: Option<&'static str>,
        args: &'static str,
    }

    #[async_trait]
    impl ClusterCli for PanickyCli {
        fn tool(&self) -> CliTool {
            self.inner.tool()
        }

        async fn run(&self, context: Option<&str>, args: &[&str]) -> CommandOutput {
            let matches_context = self.context.is_none() || self.context == context;
            if matches_context && args.join(" ") == self.args {
                panic!("cluster CLI crashed on '{}'", self.args);
            }
            self.inner.run(context, args).await
        }
    }

    #[tokio::test]
    async fn test_panicking_cluster_is_recorded_as_skipped() {
        let dir = TempDir::new().unwrap();
        let cli = Arc::new(PanickyCli {
            inner: base_cli().respond("get ns -o json", CommandOutput::ok(namespaces(&["quiet"]))),
            context: Some("ctx-bad"),
            args: "get ns -o json",
        });
        let orchestrator = Orchestrator::builder()
            .cli(cli)
            .config(ScanConfig {
                skip_prometheus: true,
                ..config(&dir)
            })
            .build()
            .unwrap();

        let run = orchestrator
            .run(vec!["ctx-ok".to_string(), "ctx-bad".to_string()])
            .await;

        assert_eq!(run.clusters.keys().collect::<Vec<_>>(), vec!["ctx-ok"]);
        assert!(run.skipped["ctx-bad"].starts_with("Cluster ctx-bad scan failed"));
    }

    #[tokio::test]
    async fn test_panicking_detection_falls_back_to_prometheus() {
        let dir = TempDir::new().unwrap();
        let cli = Arc::new(PanickyCli {
            inner: base_cli().respond("get ns -o json", CommandOutput::ok(namespaces(&["cache", "build"]))),
            context: None,
            args: "-n cache get events --ignore-not-found -o json",
        });
        let monitoring = Arc::new(FixedMonitoring::new(&[("cache", "cache-3")]));
        let orchestrator = Orchestrator::builder()
            .cli(cli)
            .monitoring_client(monitoring)
            .config(config(&dir))
            .build()
            .unwrap();

        let run = orchestrator.run(vec!["ctx".to_string()]).await;

        assert!(run.skipped.is_empty());
        let result = &run.clusters["ctx"];
        let cache = &result.namespaces["cache"]["cache-3"];
        assert_eq!(cache.sources.iter().copied().collect::<Vec<_>>(), vec![SignalSource::Prometheus]);
        assert!(result.namespaces["build"].contains_key("build-1"));
    }

    /// Answers every call successfully. Calls containing `needle` take a
    /// while (longer for the `slow` label) and are logged as start/end
    /// entries; the label is the namespace for `-n` calls, else the context.
    struct TimelineCli {
        needle: &'static str,
        slow: &'static str,
        namespaces: String,
        timeline: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TimelineCli {
        fn new(needle: &'static str, slow: &'static str, namespace_count: usize) -> Self {
            let names: Vec<String> = (0..namespace_count).map(|i| format!("ns-{i}")).collect();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            Self {
                needle,
                slow,
                namespaces: namespaces(&names),
                timeline: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn position(&self, entry: &str) -> usize {
            let timeline = self.timeline.lock().unwrap();
            timeline
                .iter()
                .position(|e| e == entry)
                .unwrap_or_else(|| panic!("'{entry}' missing from {timeline:?}"))
        }
    }

    #[async_trait]
    impl ClusterCli for TimelineCli {
        fn tool(&self) -> CliTool {
            CliTool::Oc
        }

        async fn run(&self, context: Option<&str>, args: &[&str]) -> CommandOutput {
            let joined = args.join(" ");
            if joined == "get ns -o json" {
                return CommandOutput::ok(self.namespaces.clone());
            }
            if !joined.contains(self.needle) {
                return CommandOutput::ok(EMPTY);
            }

            let label = match args {
                ["-n", namespace, ..] => namespace.to_string(),
                _ => context.unwrap_or_default().to_string(),
            };
            let delay = if label == self.slow { 150 } else { 20 };

            self.timeline.lock().unwrap().push(format!("start {label}"));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.timeline.lock().unwrap().push(format!("end {label}"));
            CommandOutput::ok(EMPTY)
        }
    }

    #[tokio::test]
    async fn test_cluster_parallelism_is_bounded() {
        let dir = TempDir::new().unwrap();
        let cli = Arc::new(TimelineCli::new("whoami", "", 0));
        let orchestrator = Orchestrator::builder()
            .cli(cli.clone())
            .config(ScanConfig {
                cluster_parallelism: 2,
                skip_prometheus: true,
                ..config(&dir)
            })
            .build()
            .unwrap();

        let contexts = (0..5).map(|i| format!("ctx-{i}")).collect();
        let run = orchestrator.run(contexts).await;

        assert_eq!(run.clusters.len(), 5);
        assert_eq!(cli.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_finished_cluster_is_replaced_immediately() {
        let dir = TempDir::new().unwrap();
        let cli = Arc::new(TimelineCli::new("whoami", "ctx-slow", 0));
        let orchestrator = Orchestrator::builder()
            .cli(cli.clone())
            .config(ScanConfig {
                cluster_parallelism: 2,
                skip_prometheus: true,
                ..config(&dir)
            })
            .build()
            .unwrap();

        let contexts = ["ctx-slow", "ctx-1", "ctx-2", "ctx-3"].map(String::from).to_vec();
        let run = orchestrator.run(contexts).await;

        assert_eq!(run.clusters.len(), 4);
        assert_eq!(cli.peak.load(Ordering::SeqCst), 2);
        // The fast contexts cycle through the second slot while the slow one runs
        assert!(cli.position("start ctx-2") < cli.position("end ctx-slow"));
        assert!(cli.position("start ctx-3") < cli.position("end ctx-slow"));
    }

    #[tokio::test]
    async fn test_namespace_workers_are_bounded() {
        let dir = TempDir::new().unwrap();
        let cli = Arc::new(TimelineCli::new("get events", "", 12));
        let orchestrator = Orchestrator::builder()
            .cli(cli.clone())
            .config(ScanConfig {
                namespace_batch_size: 10,
                namespace_workers: 3,
                skip_prometheus: true,
                ..config(&dir)
            })
            .build()
            .unwrap();

        orchestrator.run(vec!["ctx".to_string()]).await;
        assert_eq!(cli.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_namespace_batch_drains_before_next_starts() {
        let dir = TempDir::new().unwrap();
        let cli = Arc::new(TimelineCli::new("get events", "ns-0", 6));
        let orchestrator = Orchestrator::builder()
            .cli(cli.clone())
            .config(ScanConfig {
                namespace_batch_size: 2,
                namespace_workers: 3,
                skip_prometheus: true,
                ..config(&dir)
            })
            .build()
            .unwrap();

        orchestrator.run(vec!["ctx".to_string()]).await;

        // The batch, not the worker pool, is the limit here
        assert_eq!(cli.peak.load(Ordering::SeqCst), 2);

        let batches = [["ns-0", "ns-1"], ["ns-2", "ns-3"], ["ns-4", "ns-5"]];
        for pair in batches.windows(2) {
            let (done, next) = (&pair[0], &pair[1]);
            let last_end = done
                .iter()
                .map(|ns| cli.position(&format!("end {ns}")))
                .max()
                .unwrap();
            let first_start = next
                .iter()
                .map(|ns| cli.position(&format!("start {ns}")))
                .min()
                .unwrap();
            assert!(last_end < first_start, "batch {next:?} started before {done:?} drained");
        }
    }
}
