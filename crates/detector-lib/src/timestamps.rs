//! Timestamp parsing, normalisation and time-range windows

use crate::error::{DetectorError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::Duration;

const K8S_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse a Kubernetes RFC3339 timestamp (always UTC in practice).
///
/// Fractional seconds and the trailing `Z` are ignored.
pub fn parse_k8s_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    let base = ts.split('.').next().unwrap_or(ts).trim_end_matches('Z');
    NaiveDateTime::parse_from_str(base, K8S_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Normalise to `YYYY-MM-DDTHH:MM:SSZ`; unparseable input is returned verbatim
pub fn normalize_timestamp(ts: &str) -> String {
    match parse_k8s_timestamp(ts) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => ts.to_string(),
    }
}

/// Timestamp component for artifact filenames
pub fn filename_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Parse a look-back window such as `30m`, `2h`, `1d` or `1M` (30 days).
///
/// `m` is minutes and `M` is months, so the unit is case-sensitive.
pub fn parse_time_range(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let invalid = || DetectorError::InvalidTimeRange(input.to_string());

    let unit = trimmed.chars().last().ok_or_else(invalid)?;
    let digits = &trimmed[..trimmed.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        'M' => 2_592_000,
        _ => return Err(invalid()),
    };

    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

/// Lower bound for signals when a time range is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoff(DateTime<Utc>);

impl Cutoff {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// Cutoff `window` before `now`
    pub fn before(now: DateTime<Utc>, window: Duration) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        Self(now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.0
    }

    /// Missing or unparseable timestamps are admitted; findings are never
    /// dropped for lack of metadata.
    pub fn admits(&self, ts: Option<&str>) -> bool {
        match ts.and_then(parse_k8s_timestamp) {
            Some(parsed) => parsed >= self.0,
            None => true,
        }
    }
}

/// Apply an optional cutoff
pub fn within(cutoff: Option<&Cutoff>, ts: Option<&str>) -> bool {
    cutoff.map_or(true, |c| c.admits(ts))
}
