//! Diagnostic artifact capture
//!
//! For every flagged pod a description and a log file are written under
//! `<root>/<cluster>/`. A failed fetch is recorded as file content and a
//! failed write falls back to a `*.failed.txt` file, so the slot is never
//! silently lost and nothing here aborts the scan.

use crate::cluster::ClusterCli;
use crate::error::{DetectorError, Result};
use crate::models::ClusterResult;
use crate::timestamps::filename_timestamp;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

const DESCRIBE_FAILED: &str = "Failed to fetch pod description";

fn unsafe_chars() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]").ok()).as_ref()
}

/// Replace anything outside `[A-Za-z0-9_.-]` with `_`
pub fn safe_file_component(part: &str) -> String {
    match unsafe_chars() {
        Some(pattern) => pattern.replace_all(part, "_").into_owned(),
        None => part.to_string(),
    }
}

/// Outcome of writing one artifact file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactWrite {
    /// Written to the intended path
    Written(PathBuf),
    /// The intended write failed; the `*.failed.txt` file holds the error and content
    Fallback { path: PathBuf, error: String },
    /// Neither write succeeded
    Lost { path: PathBuf, error: String },
}

impl ArtifactWrite {
    /// The path reported for the finding
    pub fn path(&self) -> &Path {
        match self {
            ArtifactWrite::Written(path) => path,
            ArtifactWrite::Fallback { path, .. } | ArtifactWrite::Lost { path, .. } => path,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !matches!(self, ArtifactWrite::Written(_))
    }
}

/// One captured artifact and whether its content is a placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSlot {
    pub write: ArtifactWrite,
    /// The fetch failed and the file holds an explanation instead
    pub placeholder: bool,
}

/// Which log fetch produced the log artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOrigin {
    Current,
    Previous,
    Unavailable,
}

/// Description and log artifacts of one pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPair {
    pub description: ArtifactSlot,
    pub log: ArtifactSlot,
    pub log_origin: LogOrigin,
}

impl ArtifactPair {
    pub fn degraded_writes(&self) -> usize {
        [&self.description, &self.log]
            .iter()
            .filter(|slot| slot.write.is_degraded())
            .count()
    }
}

/// Writes per-pod diagnostics into a per-cluster directory tree
pub struct ArtifactCollector {
    root: PathBuf,
    cli: Arc<dyn ClusterCli>,
}

impl ArtifactCollector {
    pub fn new(root: impl Into<PathBuf>, cli: Arc<dyn ClusterCli>) -> Self {
        Self {
            root: root.into(),
            cli,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cluster_dir(&self, cluster: &str) -> PathBuf {
        self.root.join(safe_file_component(cluster))
    }

    /// Capture describe output and logs for `pod`, stamped with the current time
    pub async fn capture(&self, context: &str, cluster: &str, namespace: &str, pod: &str) -> ArtifactPair {
        self.capture_at(context, cluster, namespace, pod, Utc::now()).await
    }

    pub async fn capture_at(
        &self,
        context: &str,
        cluster: &str,
        namespace: &str,
        pod: &str,
        now: DateTime<Utc>,
    ) -> ArtifactPair {
        let dir = self.cluster_dir(cluster);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(path = %dir.display(), error = %e, "Could not create artifact directory");
        }

        let stem = format!(
            "{}__{}__{}",
            safe_file_component(namespace),
            safe_file_component(pod),
            filename_timestamp(now)
        );

        let (description, desc_placeholder) = self.describe(context, namespace, pod).await;
        let description = ArtifactSlot {
            write: write_with_fallback(&dir, &stem, "desc", "description", &description).await,
            placeholder: desc_placeholder,
        };

        let (log_content, log_origin) = self.logs(context, namespace, pod).await;
        let log = ArtifactSlot {
            write: write_with_fallback(&dir, &stem, "log", "logs", &log_content).await,
            placeholder: log_origin == LogOrigin::Unavailable,
        };

        debug!(
            cluster = %cluster,
            namespace = %namespace,
            pod = %pod,
            log_origin = ?log_origin,
            "Captured pod artifacts"
        );

        ArtifactPair {
            description,
            log,
            log_origin,
        }
    }

    async fn describe(&self, context: &str, namespace: &str, pod: &str) -> (String, bool) {
        let output = self
            .cli
            .run(Some(context), &["-n", namespace, "describe", "pod", pod])
            .await;
        if output.has_output() {
            (output.stdout, false)
        } else if !output.stderr.is_empty() {
            (output.stderr, true)
        } else {
            (DESCRIBE_FAILED.to_string(), true)
        }
    }

    /// Current logs, else previous logs (written verbatim), else a placeholder
    async fn logs(&self, context: &str, namespace: &str, pod: &str) -> (String, LogOrigin) {
        let current = self
            .cli
            .run(Some(context), &["-n", namespace, "logs", pod])
            .await;
        if current.has_output() {
            return (current.stdout, LogOrigin::Current);
        }

        let previous = self
            .cli
            .run(Some(context), &["-n", namespace, "logs", pod, "--previous"])
            .await;
        if previous.has_output() {
            return (previous.stdout, LogOrigin::Previous);
        }

        let placeholder = format!(
            "(no logs available)\ncurrent: {}\nprevious: {}",
            current.error_text(),
            previous.error_text()
        );
        (placeholder, LogOrigin::Unavailable)
    }
}

async fn write_with_fallback(dir: &Path, stem: &str, suffix: &str, what: &str, content: &str) -> ArtifactWrite {
    let path = dir.join(format!("{stem}__{suffix}.txt"));
    let error = match tokio::fs::write(&path, content).await {
        Ok(()) => return ArtifactWrite::Written(path),
        Err(e) => e.to_string(),
    };

    warn!(path = %path.display(), error = %error, "Artifact write failed, trying fallback");
    let fallback = dir.join(format!("{stem}__{suffix}.failed.txt"));
    let body = format!("Failed to write {what}: {error}\nOriginal content:\n{content}");
    match tokio::fs::write(&fallback, body).await {
        Ok(()) => ArtifactWrite::Fallback {
            path: fallback,
            error,
        },
        Err(e) => {
            warn!(path = %fallback.display(), error = %e, "Artifact fallback write failed");
            ArtifactWrite::Lost {
                path: fallback,
                error: format!("{error}; fallback: {e}"),
            }
        }
    }
}

/// Write `<root>/<cluster>.json` with the cluster's findings
pub async fn write_cluster_summary(root: &Path, cluster: &str, result: &ClusterResult) -> Result<PathBuf> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| DetectorError::io(root, e))?;

    let path = root.join(format!("{}.json", safe_file_component(cluster)));
    let body = serde_json::to_vec_pretty(result)
        .map_err(|e| DetectorError::io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| DetectorError::io(&path, e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::CliTool;
    use crate::models::{Finding, NamespaceFindings};
    use crate::runner::CommandOutput;
    use crate::testing::ScriptedCli;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_unsafe_char_pattern_compiles() {
        assert!(unsafe_chars().is_some());
        assert_eq!(safe_file_component("team a/pod:1"), "team_a_pod_1");
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap()
    }

    fn collector(root: &Path, cli: ScriptedCli) -> ArtifactCollector {
        ArtifactCollector::new(root, Arc::new(cli))
    }

    #[test]
    fn test_safe_file_component() {
        assert_eq!(safe_file_component("my-ns"), "my-ns");
        assert_eq!(safe_file_component("pod/with:odd chars"), "pod_with_odd_chars");
    }

    #[tokio::test]
    async fn test_capture_writes_named_files() {
        let dir = TempDir::new().unwrap();
        let cli = ScriptedCli::new(CliTool::Oc)
            .respond("-n ns1 describe pod api-1", CommandOutput::ok("Name: api-1"))
            .respond("-n ns1 logs api-1", CommandOutput::ok("started"));

        let pair = collector(dir.path(), cli)
            .capture_at("ctx", "prd-rh01", "ns1", "api-1", now())
            .await;

        let desc = pair.description.write.path().to_path_buf();
        assert_eq!(
            desc,
            dir.path().join("prd-rh01").join("ns1__api-1__20240101T000500Z__desc.txt")
        );
        assert_eq!(std::fs::read_to_string(&desc).unwrap(), "Name: api-1");
        assert!(!pair.description.placeholder);
        assert_eq!(pair.log_origin, LogOrigin::Current);
        assert_eq!(pair.degraded_writes(), 0);
        assert!(pair
            .log
            .write
            .path()
            .ends_with("ns1__api-1__20240101T000500Z__log.txt"));
    }

    #[tokio::test]
    async fn test_previous_logs_written_verbatim() {
        let dir = TempDir::new().unwrap();
        let cli = ScriptedCli::new(CliTool::Oc)
            .respond("-n ns1 logs crashy", CommandOutput::new(1, "", "container is waiting"))
            .respond("-n ns1 logs crashy --previous", CommandOutput::ok("panic: out of memory"));

        let pair = collector(dir.path(), cli)
            .capture_at("ctx", "c1", "ns1", "crashy", now())
            .await;

        assert_eq!(pair.log_origin, LogOrigin::Previous);
        assert!(!pair.log.placeholder);
        let content = std::fs::read_to_string(pair.log.write.path()).unwrap();
        assert_eq!(content, "panic: out of memory");
    }

    #[tokio::test]
    async fn test_fetch_failures_become_content() {
        let dir = TempDir::new().unwrap();
        let cli = ScriptedCli::new(CliTool::Oc)
            .respond("-n ns1 describe pod gone", CommandOutput::new(1, "", "pods \"gone\" not found"));

        let pair = collector(dir.path(), cli)
            .capture_at("ctx", "c1", "ns1", "gone", now())
            .await;

        assert!(pair.description.placeholder);
        assert_eq!(
            std::fs::read_to_string(pair.description.write.path()).unwrap(),
            "pods \"gone\" not found"
        );
        assert_eq!(pair.log_origin, LogOrigin::Unavailable);
        assert!(pair.log.placeholder);
        let log = std::fs::read_to_string(pair.log.write.path()).unwrap();
        assert!(log.starts_with("(no logs available)"));
    }

    #[tokio::test]
    async fn test_unwritable_target_falls_back() {
        let dir = TempDir::new().unwrap();
        let cluster_dir = dir.path().join("c1");
        std::fs::create_dir_all(&cluster_dir).unwrap();
        // A directory squatting on the intended file name makes the write fail
        std::fs::create_dir(cluster_dir.join("ns1__p__20240101T000500Z__desc.txt")).unwrap();

        let cli = ScriptedCli::new(CliTool::Oc)
            .respond("-n ns1 describe pod p", CommandOutput::ok("Name: p"));
        let pair = collector(dir.path(), cli)
            .capture_at("ctx", "c1", "ns1", "p", now())
            .await;

        match &pair.description.write {
            ArtifactWrite::Fallback { path, .. } => {
                assert!(path.ends_with("ns1__p__20240101T000500Z__desc.failed.txt"));
                let body = std::fs::read_to_string(path).unwrap();
                assert!(body.starts_with("Failed to write description:"));
                assert!(body.ends_with("Original content:\nName: p"));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        assert_eq!(pair.degraded_writes(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory_is_lost_not_fatal() {
        let dir = TempDir::new().unwrap();
        // A regular file where the artifact root should be
        let root = dir.path().join("root");
        std::fs::write(&root, "").unwrap();

        let pair = collector(&root, ScriptedCli::new(CliTool::Oc))
            .capture_at("ctx", "c1", "ns1", "p", now())
            .await;

        assert!(matches!(pair.description.write, ArtifactWrite::Lost { .. }));
        assert!(matches!(pair.log.write, ArtifactWrite::Lost { .. }));
    }

    #[tokio::test]
    async fn test_cluster_summary() {
        let dir = TempDir::new().unwrap();
        let mut result = ClusterResult::default();
        let mut pods = NamespaceFindings::new();
        pods.insert("a".to_string(), Finding::new("c1", "ns1", "a"));
        result.insert("ns1", pods);

        let path = write_cluster_summary(dir.path(), "c1", &result).await.unwrap();
        assert_eq!(path, dir.path().join("c1.json"));
        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["ns1"]["a"]["pod"], "a");
    }
}
