//! Event-log classification

use crate::models::{Signal, SignalKind, SignalSource, SignalTime};
use crate::timestamps::{normalize_timestamp, within, Cutoff};
use serde::Deserialize;

/// `get events -o json`, reduced to the fields classification reads
#[derive(Debug, Default, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub items: Vec<Event>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub involved_object: InvolvedObject,
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub last_timestamp: Option<String>,
    #[serde(default)]
    pub first_timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvolvedObject {
    #[serde(default)]
    pub name: Option<String>,
}

impl Event {
    /// `eventTime`, else `lastTimestamp`, else `firstTimestamp`
    pub fn timestamp(&self) -> Option<&str> {
        [&self.event_time, &self.last_timestamp, &self.first_timestamp]
            .into_iter()
            .filter_map(|ts| ts.as_deref())
            .find(|ts| !ts.is_empty())
    }

    pub fn pod(&self) -> Option<&str> {
        self.involved_object.name.as_deref().filter(|n| !n.is_empty())
    }
}

/// Classification bucket for an event reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventBucket {
    Oom,
    Crash,
    Backoff,
}

impl EventBucket {
    /// Case-insensitive substring match; first bucket wins.
    ///
    /// `oomkill` covers both the container reason `OOMKilled` and the
    /// kubelet's `OOMKilling` node event.
    pub fn classify(reason: &str) -> Option<Self> {
        let reason = reason.to_lowercase();
        if reason.contains("oomkill") {
            Some(EventBucket::Oom)
        } else if reason.contains("crashloop") {
            Some(EventBucket::Crash)
        } else if reason.contains("backoff") {
            Some(EventBucket::Backoff)
        } else {
            None
        }
    }

    /// Crash and back-off events both count as crash-loop evidence
    pub fn kind(&self) -> SignalKind {
        match self {
            EventBucket::Oom => SignalKind::OomKilled,
            EventBucket::Crash | EventBucket::Backoff => SignalKind::CrashLoop,
        }
    }
}

/// Turn an event list into signals.
///
/// Events without a pod or a timestamp are dropped, as are events older
/// than `cutoff`.
pub fn classify_events(events: &EventList, cutoff: Option<&Cutoff>) -> Vec<Signal> {
    events
        .items
        .iter()
        .filter(|event| within(cutoff, event.timestamp()))
        .filter_map(|event| {
            let bucket = EventBucket::classify(event.reason.as_deref()?)?;
            let pod = event.pod()?;
            let ts = event.timestamp()?;
            Some(Signal::new(
                pod,
                bucket.kind(),
                SignalTime::at(normalize_timestamp(ts)),
                SignalSource::Events,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn parse(json: &str) -> EventList {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_classify_buckets() {
        assert_eq!(EventBucket::classify("OOMKilling"), Some(EventBucket::Oom));
        assert_eq!(EventBucket::classify("OOMKilled"), Some(EventBucket::Oom));
        assert_eq!(EventBucket::classify("CrashLoopBackOff"), Some(EventBucket::Crash));
        assert_eq!(EventBucket::classify("BackOff"), Some(EventBucket::Backoff));
        assert_eq!(EventBucket::classify("Scheduled"), None);
        assert_eq!(EventBucket::Backoff.kind(), SignalKind::CrashLoop);
    }

    #[test]
    fn test_event_time_precedence() {
        let list = parse(
            r#"{"items":[
                {"reason":"BackOff","involvedObject":{"name":"a"},
                 "eventTime":null,"lastTimestamp":"2024-01-01T01:00:00Z","firstTimestamp":"2024-01-01T00:00:00Z"}
            ]}"#,
        );
        let signals = classify_events(&list, None);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].time, SignalTime::at("2024-01-01T01:00:00Z"));
        assert_eq!(signals[0].kind, SignalKind::CrashLoop);
    }

    #[test]
    fn test_events_without_pod_or_time_are_dropped() {
        let list = parse(
            r#"{"items":[
                {"reason":"OOMKilling","involvedObject":{},"lastTimestamp":"2024-01-01T00:00:00Z"},
                {"reason":"OOMKilling","involvedObject":{"name":"a"}},
                {"reason":"Pulled","involvedObject":{"name":"b"},"lastTimestamp":"2024-01-01T00:00:00Z"}
            ]}"#,
        );
        assert!(classify_events(&list, None).is_empty());
    }

    #[test]
    fn test_cutoff_drops_old_events() {
        let list = parse(
            r#"{"items":[
                {"reason":"OOMKilling","involvedObject":{"name":"old"},"lastTimestamp":"2023-12-01T00:00:00Z"},
                {"reason":"OOMKilling","involvedObject":{"name":"new"},"eventTime":"2024-01-01T12:00:00.000000Z"}
            ]}"#,
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let cutoff = Cutoff::before(now, Duration::from_secs(86_400));

        let signals = classify_events(&list, Some(&cutoff));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].pod, "new");
        assert_eq!(signals[0].time.as_str(), "2024-01-01T12:00:00Z");
    }
}
