//! Monitoring fallback for namespaces where detection found nothing
//!
//! The cluster's Prometheus route is discovered through the cluster CLI and
//! queried with the caller's bearer token. The endpoint and token are
//! resolved once per cluster. Every failure on this path means "no pods".

use crate::cluster::{CliTool, ClusterCli};
use crate::config::PrometheusConfig;
use crate::error::{DetectorError, Result};
use crate::models::{Finding, NamespaceFindings, SignalKind, SignalSource};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

/// Labels tried, in order, to identify the pod of a sample
const POD_LABELS: &[&str] = &["pod", "instance", "container"];

/// Instant-query expression for a metric kind in a namespace
pub fn promql(kind: SignalKind, namespace: &str) -> String {
    let metric = match kind {
        SignalKind::OomKilled => "kube_pod_container_status_last_terminated_reason",
        SignalKind::CrashLoop => "kube_pod_container_status_waiting_reason",
    };
    format!(r#"{metric}{{reason="{}",namespace="{namespace}"}}"#, kind.reason())
}

/// Where and as whom to query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrometheusTarget {
    pub base_url: Url,
    pub token: String,
}

impl PrometheusTarget {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|source| DetectorError::MonitoringUrl {
            url: base_url.to_string(),
            source,
        })?;
        Ok(Self {
            base_url,
            token: token.into(),
        })
    }

    fn query_url(&self) -> Result<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join("api/v1/query")
            .map_err(|source| DetectorError::MonitoringUrl {
                url: self.base_url.to_string(),
                source,
            })
    }
}

/// Label map of one sample in a query result
pub type MetricLabels = HashMap<String, String>;

/// Capability to run an authenticated instant query
#[async_trait]
pub trait MonitoringClient: Send + Sync {
    async fn instant_query(&self, target: &PrometheusTarget, query: &str) -> Result<Vec<MetricLabels>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryEnvelope {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<QuerySample>,
}

#[derive(Debug, Default, Deserialize)]
struct QuerySample {
    #[serde(default)]
    metric: MetricLabels,
}

/// Decode a `/api/v1/query` response body
pub fn decode_query_response(body: &str) -> Result<Vec<MetricLabels>> {
    let envelope: QueryEnvelope = serde_json::from_str(body)?;
    if envelope.status != "success" {
        return Err(DetectorError::MonitoringQuery {
            error_type: envelope.error_type.unwrap_or_else(|| "unknown".to_string()),
            message: envelope.error.unwrap_or_else(|| "unknown error".to_string()),
        });
    }
    Ok(envelope
        .data
        .unwrap_or_default()
        .result
        .into_iter()
        .map(|sample| sample.metric)
        .collect())
}

/// [`MonitoringClient`] over HTTPS with reqwest
pub struct HttpMonitoringClient {
    client: Client,
}

impl HttpMonitoringClient {
    pub fn new(timeout: Duration, verify_tls: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MonitoringClient for HttpMonitoringClient {
    async fn instant_query(&self, target: &PrometheusTarget, query: &str) -> Result<Vec<MetricLabels>> {
        let response = self
            .client
            .get(target.query_url()?)
            .bearer_auth(&target.token)
            .query(&[("query", query)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(DetectorError::MonitoringStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        decode_query_response(&body)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RouteList {
    #[serde(default)]
    items: Vec<Route>,
}

#[derive(Debug, Default, Deserialize)]
struct Route {
    #[serde(default)]
    metadata: RouteMetadata,
    #[serde(default)]
    spec: RouteSpec,
}

#[derive(Debug, Default, Deserialize)]
struct RouteMetadata {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct RouteSpec {
    #[serde(default)]
    host: String,
}

/// Pick the first route whose name contains `route_name` and is not a
/// federation endpoint
fn select_route_host(routes: &RouteList, route_name: &str) -> Option<String> {
    routes
        .items
        .iter()
        .filter(|r| r.metadata.name.contains(route_name))
        .filter(|r| !r.metadata.name.to_lowercase().contains("federate"))
        .map(|r| r.spec.host.trim())
        .find(|host| !host.is_empty())
        .map(str::to_string)
}

/// Per-cluster fallback querier
pub struct Escalator {
    cli: Arc<dyn ClusterCli>,
    client: Arc<dyn MonitoringClient>,
    config: PrometheusConfig,
    context: String,
    cluster: String,
    target: OnceCell<PrometheusTarget>,
}

impl Escalator {
    pub fn new(
        cli: Arc<dyn ClusterCli>,
        client: Arc<dyn MonitoringClient>,
        config: PrometheusConfig,
        context: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            cli,
            client,
            config,
            context: context.into(),
            cluster: cluster.into(),
            target: OnceCell::new(),
        }
    }

    /// Pods the monitoring stack reports for `kind` in `namespace`.
    ///
    /// Empty on any failure.
    pub async fn query_historical(&self, namespace: &str, kind: SignalKind) -> Vec<String> {
        let Some(target) = self.target().await else {
            return Vec::new();
        };

        let query = promql(kind, namespace);
        match self.client.instant_query(target, &query).await {
            Ok(samples) => samples.iter().filter_map(pod_from_labels).collect(),
            Err(e) => {
                debug!(
                    cluster = %self.cluster,
                    namespace = %namespace,
                    query = %query,
                    error = %e,
                    "Prometheus query failed"
                );
                Vec::new()
            }
        }
    }

    /// Findings from both metric kinds, tagged `prometheus` with no timestamps
    pub async fn escalate(&self, namespace: &str) -> Option<NamespaceFindings> {
        let mut findings = NamespaceFindings::new();
        for kind in [SignalKind::OomKilled, SignalKind::CrashLoop] {
            for pod in self.query_historical(namespace, kind).await {
                findings
                    .entry(pod.clone())
                    .or_insert_with(|| Finding::new(&self.cluster, namespace, pod))
                    .mark_source(SignalSource::Prometheus);
            }
        }

        if findings.is_empty() {
            None
        } else {
            info!(
                cluster = %self.cluster,
                namespace = %namespace,
                pods = findings.len(),
                "Prometheus fallback found pods"
            );
            Some(findings)
        }
    }

    /// Endpoint and token, cached for the cluster once resolved.
    ///
    /// A failed resolution is not cached, so the next query tries again.
    async fn target(&self) -> Option<&PrometheusTarget> {
        self.target
            .get_or_try_init(|| async { self.resolve_target().await.ok_or(()) })
            .await
            .ok()
    }

    async fn resolve_target(&self) -> Option<PrometheusTarget> {
        let url = match &self.config.url {
            Some(url) => url.clone(),
            None => self.discover_endpoint().await?,
        };
        let token = self.fetch_token().await?;
        match PrometheusTarget::new(&url, token) {
            Ok(target) => Some(target),
            Err(e) => {
                debug!(cluster = %self.cluster, error = %e, "Unusable Prometheus endpoint");
                None
            }
        }
    }

    async fn discover_endpoint(&self) -> Option<String> {
        let ns = self.config.namespace.as_str();
        let route = self.config.route_name.as_str();

        let output = self
            .cli
            .run(
                Some(&self.context),
                &["-n", ns, "get", "route", route, "-o", "jsonpath={.spec.host}", "--ignore-not-found"],
            )
            .await;
        if output.has_output() {
            return Some(format!("https://{}", output.stdout.trim()));
        }

        let output = self
            .cli
            .run(Some(&self.context), &["-n", ns, "get", "route", "-o", "json"])
            .await;
        let host = if output.has_output() {
            serde_json::from_str::<RouteList>(&output.stdout)
                .ok()
                .and_then(|routes| select_route_host(&routes, route))
        } else {
            None
        };

        if host.is_none() {
            debug!(cluster = %self.cluster, namespace = %ns, "Could not find Prometheus route");
        }
        host.map(|h| format!("https://{h}"))
    }

    async fn fetch_token(&self) -> Option<String> {
        let args: &[&str] = match self.cli.tool() {
            CliTool::Oc => &["whoami", "--show-token"],
            CliTool::Kubectl => &[
                "config",
                "view",
                "--minify",
                "--raw",
                "-o",
                "jsonpath={.users[0].user.token}",
            ],
        };
        let output = self.cli.run(Some(&self.context), args).await;
        let token = output.stdout.trim();
        if output.success() && !token.is_empty() {
            Some(token.to_string())
        } else {
            debug!(cluster = %self.cluster, "Could not get authentication token");
            None
        }
    }
}

fn pod_from_labels(labels: &MetricLabels) -> Option<String> {
    POD_LABELS
        .iter()
        .filter_map(|key| labels.get(*key))
        .find(|value| !value.is_empty())
        .cloned()
}
