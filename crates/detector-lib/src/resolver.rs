//! Context and namespace discovery
//!
//! Contexts are enumerated once per run. Namespaces are listed per context
//! after a connectivity probe and filtered in a fixed order: ephemeral
//! check, then include patterns, then exclude patterns.

use crate::cluster::{CliTool, ClusterCli};
use crate::error::{DetectorError, Result};
use crate::models::NamespaceInfo;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Label set by the environment-as-a-service operator on ephemeral namespaces
pub const NAMESPACE_TYPE_LABEL: &str = "konflux-ci.dev/namespace-type";
/// Value of [`NAMESPACE_TYPE_LABEL`] that marks an ephemeral namespace
pub const EPHEMERAL_NAMESPACE_TYPE: &str = "eaas";

/// (label key fragment, value fragments) pairs that also indicate an ephemeral namespace
const EPHEMERAL_LABEL_INDICATORS: &[(&str, &[&str])] = &[
    (NAMESPACE_TYPE_LABEL, &["eaas", "ephemeral", "test"]),
    ("namespace-type", &["eaas", "ephemeral", "test"]),
    ("ephemeral", &["true", "yes"]),
];

const EPHEMERAL_NAME_PATTERNS: &[&str] = &[
    r"(?i)^clusters-[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
    r"(?i)^test-",
    r"(?i)^e2e-",
    r"(?i)^ephemeral-",
    r"(?i)^ci-",
    r"(?i)^pr-",
    r"(?i)^temp-",
    r"(?i)^tmp-",
    r"(?i)-test$",
    r"(?i)-e2e$",
    r"(?i)-ephemeral$",
];

fn ephemeral_name_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        EPHEMERAL_NAME_PATTERNS
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Ephemeral namespace pattern does not compile");
                    None
                }
            })
            .collect()
    })
}

fn cluster_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"api-([^-]+-[^-]+-[^-]+)").ok())
        .as_ref()
}

/// Human-friendly cluster name derived from a context identifier
pub fn short_cluster_name(context: &str) -> String {
    if let Some(caps) = cluster_name_pattern().and_then(|p| p.captures(context)) {
        return caps[1].to_string();
    }
    if let Some((_, last)) = context.rsplit_once('/') {
        return last.to_string();
    }
    context.replace(['/', ':'], "_")
}

/// All contexts known to the local kubeconfig; empty on failure
pub async fn list_contexts(cli: &dyn ClusterCli) -> Vec<String> {
    let output = cli.run(None, &["config", "get-contexts", "-o", "name"]).await;
    if !output.has_output() {
        warn!(error = %output.error_text(), "Could not list contexts");
        return Vec::new();
    }
    output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// The kubeconfig's current context, if any
pub async fn current_context(cli: &dyn ClusterCli) -> Option<String> {
    let output = cli.run(None, &["config", "current-context"]).await;
    if output.success() && !output.stdout.trim().is_empty() {
        Some(output.stdout.trim().to_string())
    } else {
        None
    }
}

/// Resolve each substring to exactly one context (case-insensitive)
pub fn match_contexts_by_substring(substrings: &[String], available: &[String]) -> Result<Vec<String>> {
    let mut matched = Vec::with_capacity(substrings.len());
    for substring in substrings {
        let needle = substring.to_lowercase();
        let matches: Vec<String> = available
            .iter()
            .filter(|ctx| ctx.to_lowercase().contains(&needle))
            .cloned()
            .collect();

        match matches.len() {
            0 => {
                return Err(DetectorError::NoContextMatch {
                    substring: substring.clone(),
                    available: available.to_vec(),
                })
            }
            1 => {
                debug!(substring = %substring, context = %matches[0], "Matched context");
                matched.extend(matches);
            }
            _ => {
                return Err(DetectorError::AmbiguousContext {
                    substring: substring.clone(),
                    matches,
                })
            }
        }
    }
    Ok(matched)
}

/// Probe a context before touching its namespaces.
///
/// `oc` has `whoami`; plain kubectl uses `get ns`, which works for every
/// auth method. The error carries the CLI's explanation.
pub async fn check_connectivity(cli: &dyn ClusterCli, context: &str) -> std::result::Result<(), String> {
    let args: &[&str] = match cli.tool() {
        CliTool::Oc => &["whoami"],
        CliTool::Kubectl => &["get", "ns"],
    };
    let output = cli.run(Some(context), args).await;
    if output.success() {
        Ok(())
    } else {
        Err(output.error_text().to_string())
    }
}

/// Why a namespace was kept or dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Keep,
    Ephemeral,
    NotIncluded,
    Excluded,
}

/// Include/exclude/ephemeral policy, built once from configuration
#[derive(Debug, Clone, Default)]
pub struct NamespaceFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    exclude_ephemeral: bool,
}

impl NamespaceFilter {
    pub fn compile(include: &[String], exclude: &[String], exclude_ephemeral: bool) -> Result<Self> {
        Ok(Self {
            include: compile_patterns(include)?,
            exclude: compile_patterns(exclude)?,
            exclude_ephemeral,
        })
    }

    /// Ephemeral check runs first, so an include match cannot rescue an
    /// ephemeral namespace.
    pub fn decide(&self, namespace: &NamespaceInfo) -> FilterDecision {
        if self.exclude_ephemeral && is_ephemeral_namespace(&namespace.name, &namespace.labels) {
            return FilterDecision::Ephemeral;
        }
        if !self.include.is_empty() && !self.include.iter().any(|p| p.is_match(&namespace.name)) {
            return FilterDecision::NotIncluded;
        }
        if self.exclude.iter().any(|p| p.is_match(&namespace.name)) {
            return FilterDecision::Excluded;
        }
        FilterDecision::Keep
    }

    pub fn admits(&self, namespace: &NamespaceInfo) -> bool {
        self.decide(namespace) == FilterDecision::Keep
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| {
            Regex::new(p).map_err(|source| DetectorError::InvalidPattern {
                pattern: p.to_string(),
                source,
            })
        })
        .collect()
}

/// Ephemeral test or cluster namespace detection.
///
/// Labels are authoritative and checked first; name patterns are the
/// fallback for namespaces without labels.
pub fn is_ephemeral_namespace(name: &str, labels: &BTreeMap<String, String>) -> bool {
    if name.is_empty() {
        return false;
    }

    if labels.get(NAMESPACE_TYPE_LABEL).map(String::as_str) == Some(EPHEMERAL_NAMESPACE_TYPE) {
        return true;
    }

    for (key, value) in labels {
        let key = key.to_lowercase();
        let value = value.to_lowercase();
        for (indicator_key, indicator_values) in EPHEMERAL_LABEL_INDICATORS {
            if key.contains(indicator_key) && indicator_values.iter().any(|v| value.contains(v)) {
                return true;
            }
        }
    }

    ephemeral_name_patterns().iter().any(|p| p.is_match(name))
}

#[derive(Debug, Default, Deserialize)]
struct NamespaceList {
    #[serde(default)]
    items: Vec<NamespaceItem>,
}

#[derive(Debug, Default, Deserialize)]
struct NamespaceItem {
    #[serde(default)]
    metadata: NamespaceMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct NamespaceMetadata {
    name: Option<String>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

/// Parse a `get ns -o json` payload
pub fn parse_namespaces(payload: &str) -> std::result::Result<Vec<NamespaceInfo>, serde_json::Error> {
    let list: NamespaceList = serde_json::from_str(payload)?;
    Ok(list
        .items
        .into_iter()
        .filter_map(|item| {
            let name = item.metadata.name.filter(|n| !n.is_empty())?;
            Some(NamespaceInfo {
                name,
                labels: item.metadata.labels.unwrap_or_default(),
            })
        })
        .collect())
}

/// Namespaces of `context` that pass `filter`.
///
/// A failed or malformed listing yields no namespaces rather than an error.
pub async fn list_namespaces(cli: &dyn ClusterCli, context: &str, filter: &NamespaceFilter) -> Vec<String> {
    let output = cli.run(Some(context), &["get", "ns", "-o", "json"]).await;
    if !output.has_output() {
        warn!(context = %context, error = %output.error_text(), "Could not list namespaces");
        return Vec::new();
    }

    let namespaces = match parse_namespaces(&output.stdout) {
        Ok(namespaces) => namespaces,
        Err(e) => {
            warn!(context = %context, error = %e, "Failed to parse namespaces JSON");
            return Vec::new();
        }
    };

    namespaces
        .into_iter()
        .filter(|ns| match filter.decide(ns) {
            FilterDecision::Keep => true,
            decision => {
                debug!(context = %context, namespace = %ns.name, decision = ?decision, "Skipping namespace");
                false
            }
        })
        .map(|ns| ns.name)
        .collect()
}
