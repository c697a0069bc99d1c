//! Pod-status evidence
//!
//! Only the fields the extractors read are modelled: container and
//! init-container statuses (state, lastState, restartCount) and the pod phase.

use crate::models::{Signal, SignalKind, SignalSource, SignalTime};
use crate::timestamps::{normalize_timestamp, within, Cutoff};
use serde::Deserialize;
use std::collections::HashSet;

const OOM_REASON: &str = "OOMKilled";
const CRASH_LOOP_REASON: &str = "CrashLoopBackOff";
const FAILED_PHASE: &str = "Failed";

/// Restart count from which a terminated container counts as crash-looping
pub const RESTART_THRESHOLD: u32 = 3;

#[derive(Debug, Default, Deserialize)]
pub struct PodList {
    #[serde(default)]
    pub items: Vec<Pod>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: PodMetadata,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct PodMetadata {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub container_statuses: Option<Vec<ContainerStatus>>,
    #[serde(default)]
    pub init_container_statuses: Option<Vec<ContainerStatus>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub state: Option<ContainerState>,
    #[serde(default)]
    pub last_state: Option<ContainerState>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerState {
    #[serde(default)]
    pub waiting: Option<StateDetail>,
    #[serde(default)]
    pub terminated: Option<StateDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDetail {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

impl StateDetail {
    fn has_reason(&self, reason: &str) -> bool {
        self.reason.as_deref() == Some(reason)
    }

    fn finished_at(&self) -> Option<&str> {
        self.finished_at.as_deref().filter(|ts| !ts.is_empty())
    }
}

impl Pod {
    fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref().filter(|n| !n.is_empty())
    }

    /// Regular containers followed by init containers
    fn all_statuses(&self) -> impl Iterator<Item = &ContainerStatus> {
        self.status
            .container_statuses
            .iter()
            .flatten()
            .chain(self.status.init_container_statuses.iter().flatten())
    }
}

impl ContainerStatus {
    fn waiting(&self) -> Option<&StateDetail> {
        self.state.as_ref()?.waiting.as_ref()
    }

    fn terminated(&self) -> Option<&StateDetail> {
        self.state.as_ref()?.terminated.as_ref()
    }

    fn last_terminated(&self) -> Option<&StateDetail> {
        self.last_state.as_ref()?.terminated.as_ref()
    }
}

/// Which terminated block a signal was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StateOrigin {
    Current,
    Previous,
}

fn dated(finished_at: Option<&str>) -> SignalTime {
    finished_at
        .map(|ts| SignalTime::at(normalize_timestamp(ts)))
        .unwrap_or(SignalTime::Unknown)
}

/// OOM evidence from current and previous terminated states.
///
/// One signal per distinct (pod, origin, finishedAt), so a container killed
/// twice with different finish times yields two timestamps.
pub fn oom_signals(pods: &PodList, cutoff: Option<&Cutoff>) -> Vec<Signal> {
    let mut seen: HashSet<(&str, StateOrigin, Option<&str>)> = HashSet::new();
    let mut signals = Vec::new();

    for pod in &pods.items {
        let Some(name) = pod.name() else { continue };

        for status in pod.all_statuses() {
            let blocks = [
                (StateOrigin::Current, status.terminated()),
                (StateOrigin::Previous, status.last_terminated()),
            ];
            for (origin, block) in blocks {
                let Some(terminated) = block.filter(|t| t.has_reason(OOM_REASON)) else {
                    continue;
                };
                let finished_at = terminated.finished_at();
                if !within(cutoff, finished_at) {
                    continue;
                }
                if seen.insert((name, origin, finished_at)) {
                    signals.push(Signal::new(
                        name,
                        SignalKind::OomKilled,
                        dated(finished_at),
                        SignalSource::PodStatus,
                    ));
                }
            }
        }
    }
    signals
}

/// Crash-loop evidence, at most one signal per pod.
///
/// Checked per container in order: waiting reason, current terminated
/// reason, previous terminated reason, then the restart heuristic. A
/// `Failed` pod with any restarts is flagged last.
pub fn crashloop_signals(pods: &PodList, cutoff: Option<&Cutoff>) -> Vec<Signal> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut signals = Vec::new();

    for pod in &pods.items {
        let Some(name) = pod.name() else { continue };

        for status in pod.all_statuses() {
            if seen.contains(name) {
                break;
            }
            if let Some(time) = container_crash_time(status, cutoff) {
                seen.insert(name);
                signals.push(Signal::new(name, SignalKind::CrashLoop, time, SignalSource::PodStatus));
            }
        }

        let failed = pod.status.phase.as_deref() == Some(FAILED_PHASE);
        if failed && !seen.contains(name) && pod.all_statuses().any(|s| s.restart_count > 0) {
            seen.insert(name);
            signals.push(Signal::new(
                name,
                SignalKind::CrashLoop,
                SignalTime::Unknown,
                SignalSource::PodStatus,
            ));
        }
    }
    signals
}

/// The time to record if this container shows crash-loop evidence
fn container_crash_time(status: &ContainerStatus, cutoff: Option<&Cutoff>) -> Option<SignalTime> {
    // A waiting container has no finish time, so the window cannot apply
    if status.waiting().is_some_and(|w| w.has_reason(CRASH_LOOP_REASON)) {
        return Some(SignalTime::Unknown);
    }

    for block in [status.terminated(), status.last_terminated()].into_iter().flatten() {
        if block.has_reason(CRASH_LOOP_REASON) {
            let finished_at = block.finished_at();
            return within(cutoff, finished_at).then(|| dated(finished_at));
        }
    }

    if status.restart_count >= RESTART_THRESHOLD {
        if let Some(block) = status.terminated().or(status.last_terminated()) {
            let finished_at = block.finished_at();
            return within(cutoff, finished_at).then(|| dated(finished_at));
        }
    }
    None
}
