//! Replication synchronizer
//!
//! Computes the send-set for a dataset and drives it through the transport.
//! Transfers for one dataset are strictly sequential: each incremental
//! stream is based on the previous snapshot, which must already exist on
//! the remote.

use crate::cancel::CancellationFlag;
use crate::driver::ReplicationTransport;
use crate::errors::{ErrorClass, ExError, ZrError};
use crate::model::{RetentionPolicy, Snapshot, SnapshotName};
use crate::retention::compute_destroy_candidates;
use crate::timeline::{RemoteView, Timeline};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

/// One transfer in a send-set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SendStep {
    /// Complete stream, only when the remote dataset does not exist
    Full { to: SnapshotName },
    /// Delta from a snapshot the remote already has
    Incremental { from: SnapshotName, to: SnapshotName },
}

impl SendStep {
    pub fn target(&self) -> SnapshotName {
        match self {
            SendStep::Full { to } | SendStep::Incremental { to, .. } => *to,
        }
    }
}

/// Per-dataset replication status consumed by the safe-destroy gate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationState {
    /// Newest snapshot confirmed on the remote
    pub high_water_mark: Option<SnapshotName>,
    /// Local snapshots not yet confirmed, oldest first
    pub pending: Vec<SnapshotName>,
}

impl ReplicationState {
    pub fn from_timeline(timeline: &Timeline) -> Self {
        Self {
            high_water_mark: timeline.high_water_mark(),
            pending: timeline.pending(),
        }
    }

    /// Whether `name` is confirmed replicated (at or before the mark)
    pub fn is_replicated(&self, name: SnapshotName) -> bool {
        self.high_water_mark.map_or(false, |hwm| name <= hwm)
    }
}

/// Outcome of one `synchronize` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicationResult {
    /// Acknowledged transfers, in order
    pub sent: Vec<SendStep>,
    /// Snapshot whose transfer failed; later ones were not attempted
    pub failed: Vec<SnapshotName>,
    pub high_water_mark: Option<SnapshotName>,
    /// State after the run, for the gate
    pub state: ReplicationState,
    /// Why sending stopped early, if it did
    pub error: Option<ExError>,
}

/// Compute the ordered send-set for a timeline
///
/// # Errors
///
/// - the remote view is unavailable (the list error is returned)
/// - the remote dataset exists but shares no managed snapshot with the
///   local timeline, so no incremental base exists and a full stream
///   would be refused by the receiver
pub fn plan_sends(timeline: &Timeline) -> Result<Vec<SendStep>, ExError> {
    match timeline.remote() {
        RemoteView::NotConfigured => return Ok(Vec::new()),
        RemoteView::Unavailable(err) => return Err(err.clone()),
        RemoteView::Absent | RemoteView::Known(_) => {}
    }

    let hwm = timeline.high_water_mark();
    let exists = matches!(timeline.remote(), RemoteView::Known(_));
    if exists && hwm.is_none() && !timeline.local().is_empty() {
        return Err(ZrError::NoCommonSnapshot {
            dataset: timeline.dataset().to_string(),
            remote: timeline
                .remote_dataset()
                .unwrap_or(timeline.dataset())
                .to_string(),
        }
        .into());
    }

    let mut steps = Vec::new();
    let mut base = hwm;
    for name in timeline.pending() {
        steps.push(match base {
            None => SendStep::Full { to: name },
            Some(from) => SendStep::Incremental { from, to: name },
        });
        base = Some(name);
    }
    Ok(steps)
}

/// Drives transfers for one dataset at a time
pub struct Synchronizer<'a> {
    transport: &'a dyn ReplicationTransport,
    cancel: &'a CancellationFlag,
}

impl<'a> Synchronizer<'a> {
    pub fn new(transport: &'a dyn ReplicationTransport, cancel: &'a CancellationFlag) -> Self {
        Self { transport, cancel }
    }

    /// Send every pending snapshot of `timeline`, oldest first
    ///
    /// The timeline is updated after each acknowledgment, so progress made
    /// before a failure or cancellation is kept. The first failure stops
    /// the remaining transfers for this dataset.
    pub fn synchronize(&self, timeline: &mut Timeline) -> ReplicationResult {
        let start = Instant::now();
        let dataset = timeline.dataset().to_string();
        let destination = timeline
            .remote_dataset()
            .unwrap_or(timeline.dataset())
            .to_string();
        crate::log_op_start!("synchronize", dataset = dataset.as_str());

        let mut result = ReplicationResult::default();

        match plan_sends(timeline) {
            Err(err) => {
                crate::log_op_error!(
                    "synchronize",
                    err.clone(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    dataset = dataset.as_str()
                );
                result.error = Some(err);
            }
            Ok(steps) => {
                for step in steps {
                    if self.cancel.is_cancelled() {
                        warn!(dataset = dataset.as_str(), "Cancelled before next send");
                        result.error = Some(
                            ZrError::Cancelled {
                                op: "send".to_string(),
                                dataset: dataset.clone(),
                            }
                            .into(),
                        );
                        break;
                    }

                    match self.send(&dataset, &destination, step) {
                        Ok(()) => {
                            timeline.record_remote(step.target());
                            result.sent.push(step);
                            info!(
                                dataset = dataset.as_str(),
                                snapshot = %step.target(),
                                "Replicated snapshot"
                            );
                        }
                        Err(err) => {
                            crate::log_op_error!(
                                "synchronize",
                                err.clone(),
                                duration_ms = start.elapsed().as_millis() as u64,
                                dataset = dataset.as_str()
                            );
                            result.failed.push(step.target());
                            result.error = Some(err);
                            break;
                        }
                    }
                }
            }
        }

        result.state = ReplicationState::from_timeline(timeline);
        result.high_water_mark = result.state.high_water_mark;

        crate::log_op_end!(
            "synchronize",
            duration_ms = start.elapsed().as_millis() as u64,
            dataset = dataset.as_str(),
            sent = result.sent.len() as u64,
            pending_len = result.state.pending.len() as u64
        );
        result
    }

    fn send(&self, dataset: &str, destination: &str, step: SendStep) -> Result<(), ExError> {
        let outcome = match step {
            SendStep::Full { to } => self
                .transport
                .send_full(&Snapshot::new(dataset, to), destination),
            SendStep::Incremental { from, to } => self.transport.send_incremental(
                &Snapshot::new(dataset, from),
                &Snapshot::new(dataset, to),
                destination,
            ),
        };
        outcome.map_err(|e| {
            e.with_class(ErrorClass::Transport)
                .with_dataset(dataset)
                .with_snapshot(Snapshot::new(dataset, step.target()).to_string())
        })
    }

    /// Prune remote snapshots beyond the secondary retention limit
    ///
    /// Only snapshots strictly older than the high-water mark are eligible,
    /// so the incremental base always survives on the remote.
    pub fn prune_remote(&self, timeline: &mut Timeline, policy: RetentionPolicy) -> RemotePruneResult {
        let mut result = RemotePruneResult::default();
        let Some(remote_dataset) = timeline.remote_dataset().map(str::to_string) else {
            return result;
        };
        let Some(hwm) = timeline.high_water_mark() else {
            return result;
        };
        let remote: Vec<SnapshotName> = match timeline.remote_names() {
            Some(names) => names.iter().copied().collect(),
            None => return result,
        };

        for name in compute_destroy_candidates(&remote, policy) {
            if name >= hwm {
                continue;
            }
            if self.cancel.is_cancelled() {
                result.error = Some(
                    ZrError::Cancelled {
                        op: "destroy_remote_snapshot".to_string(),
                        dataset: timeline.dataset().to_string(),
                    }
                    .into(),
                );
                break;
            }
            match self.transport.destroy_remote_snapshot(&remote_dataset, name) {
                Ok(()) => {
                    timeline.forget_remote(name);
                    result.destroyed.push(name);
                }
                Err(e) => {
                    result.error = Some(
                        e.with_class(ErrorClass::Transport)
                            .with_dataset(timeline.dataset())
                            .with_snapshot(format!("{}@{}", remote_dataset, name)),
                    );
                    break;
                }
            }
        }
        result
    }
}

/// Outcome of secondary retention on the remote pool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePruneResult {
    pub destroyed: Vec<SnapshotName>,
    pub error: Option<ExError>,
}
