//! Error types for the detector library
//!
//! Only setup-time failures and the monitoring client surface these errors.
//! The scan itself degrades to "no signal" instead of propagating them.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for detector operations.
pub type Result<T> = std::result::Result<T, DetectorError>;

/// Errors that can occur while preparing or running a scan.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Neither `kubectl` nor `oc` could be executed.
    #[error("neither 'kubectl' nor 'oc' CLI tool found; install kubectl (Kubernetes) or oc (OpenShift)")]
    NoCliTool,

    /// A context substring matched nothing.
    #[error("no context found matching substring '{substring}'")]
    NoContextMatch {
        substring: String,
        available: Vec<String>,
    },

    /// A context substring matched more than one context.
    #[error("multiple contexts match substring '{substring}': {}", matches.join(", "))]
    AmbiguousContext {
        substring: String,
        matches: Vec<String>,
    },

    /// No contexts were discovered or selected.
    #[error("no contexts available to scan")]
    NoContexts,

    /// A builder was finished without a required component.
    #[error("{0} is required")]
    MissingComponent(&'static str),

    /// A namespace include/exclude pattern failed to compile.
    #[error("invalid namespace pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A time range string could not be parsed.
    #[error("invalid time range '{0}': expected <number><s|m|h|d|M>, e.g. 30m, 2h, 1d")]
    InvalidTimeRange(String),

    /// Configuration could not be loaded.
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    /// The monitoring endpoint could not be reached.
    #[error("monitoring request failed: {0}")]
    MonitoringHttp(#[from] reqwest::Error),

    /// The monitoring endpoint answered with a non-success HTTP status.
    #[error("monitoring endpoint returned HTTP {status}: {body}")]
    MonitoringStatus { status: u16, body: String },

    /// The monitoring response body was not the expected JSON envelope.
    #[error("monitoring response could not be decoded: {0}")]
    MonitoringDecode(#[from] serde_json::Error),

    /// The monitoring query itself reported an error.
    #[error("monitoring query failed ({error_type}): {message}")]
    MonitoringQuery { error_type: String, message: String },

    /// An invalid monitoring endpoint URL.
    #[error("invalid monitoring URL '{url}': {source}")]
    MonitoringUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Filesystem error while writing scan output.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DetectorError {
    /// Build an I/O error carrying the offending path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
