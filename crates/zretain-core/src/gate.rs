//! Safe-destroy gate
//!
//! The only path by which a snapshot is destroyed. Retention candidates are
//! filtered against the dataset's replication state, then each approved
//! destroy is re-checked right before the storage driver is called.

use crate::cancel::CancellationFlag;
use crate::driver::StorageDriver;
use crate::errors::{ExError, ExErrorKind, ZrError};
use crate::model::{Snapshot, SnapshotName};
use crate::replication::ReplicationState;
use crate::timeline::Timeline;
use serde::Serialize;
use std::time::Instant;
use tracing::warn;

/// Why a retention candidate was kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Not yet confirmed on the remote
    NotReplicated,
    /// Newest snapshot confirmed on the remote; the next incremental base
    HighWaterMark,
    /// Dependent clones exist
    HasClones,
    /// Run cancellation was raised before the destroy was issued
    Cancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotReplicated => "not_replicated",
            SkipReason::HighWaterMark => "high_water_mark",
            SkipReason::HasClones => "has_clones",
            SkipReason::Cancelled => "cancelled",
        }
    }
}

/// Result of filtering retention candidates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateDecision {
    pub approved: Vec<SnapshotName>,
    pub skipped: Vec<(SnapshotName, SkipReason)>,
}

/// Split retention candidates into approved and protected snapshots
///
/// With replication required, a candidate is approved only when it is
/// strictly older than the high-water mark. A missing state (the remote
/// could not be queried, or sync never confirmed anything) protects every
/// candidate. Without replication every candidate is approved.
pub fn filter_safe_to_destroy(
    candidates: &[SnapshotName],
    state: Option<&ReplicationState>,
    replication_required: bool,
) -> GateDecision {
    let mut decision = GateDecision::default();
    if !replication_required {
        decision.approved = candidates.to_vec();
        return decision;
    }

    let hwm = state.and_then(|s| s.high_water_mark);
    for &name in candidates {
        match hwm {
            Some(h) if name < h => decision.approved.push(name),
            Some(h) if name == h => decision.skipped.push((name, SkipReason::HighWaterMark)),
            _ => decision.skipped.push((name, SkipReason::NotReplicated)),
        }
    }
    decision
}

/// Last-moment check for a single destroy
///
/// # Errors
///
/// Returns [`ZrError::SafetyViolation`] when `name` is the newest local
/// snapshot, or when replication is required and `name` is not strictly
/// older than the high-water mark.
pub fn check_destroy_allowed(
    dataset: &str,
    name: SnapshotName,
    newest_local: Option<SnapshotName>,
    state: Option<&ReplicationState>,
    replication_required: bool,
) -> Result<(), ZrError> {
    let violation = |reason: &str| ZrError::SafetyViolation {
        dataset: dataset.to_string(),
        snapshot: name.to_string(),
        reason: reason.to_string(),
    };

    if newest_local == Some(name) {
        return Err(violation("snapshot is the newest local restore point"));
    }
    if replication_required {
        match state.and_then(|s| s.high_water_mark) {
            None => return Err(violation("no snapshot is confirmed on the remote")),
            Some(hwm) if name == hwm => {
                return Err(violation("snapshot is the replication high-water mark"))
            }
            Some(hwm) if name > hwm => return Err(violation("snapshot is not replicated yet")),
            Some(_) => {}
        }
    }
    Ok(())
}

/// What the gate did for one dataset
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use]
pub struct DestroyOutcome {
    /// Destroys that completed, including those before a violation
    pub destroyed: Vec<SnapshotName>,
    pub skipped: Vec<(SnapshotName, SkipReason)>,
    /// Dataset-scoped failures; remaining destroys still ran
    pub errors: Vec<ExError>,
    /// Safety violation that stopped the gate; fatal for the whole run
    pub violation: Option<ExError>,
}

/// Issues approved destroys through the storage driver
pub struct SafeDestroyGate<'a> {
    storage: &'a dyn StorageDriver,
    cancel: &'a CancellationFlag,
}

impl<'a> SafeDestroyGate<'a> {
    pub fn new(storage: &'a dyn StorageDriver, cancel: &'a CancellationFlag) -> Self {
        Self { storage, cancel }
    }

    /// Destroy the approved snapshots of `decision`, oldest first
    ///
    /// Snapshots with clones are skipped with a warning and never retried.
    /// Driver failures are collected and the remaining destroys continue.
    ///
    /// A safety violation stops the gate at once, raises the run's
    /// cancellation flag and is returned in [`DestroyOutcome::violation`]
    /// next to the destroys that already happened.
    pub fn destroy(
        &self,
        timeline: &mut Timeline,
        decision: GateDecision,
        state: Option<&ReplicationState>,
        replication_required: bool,
    ) -> DestroyOutcome {
        let start = Instant::now();
        let dataset = timeline.dataset().to_string();
        crate::log_op_start!("safe_destroy", dataset = dataset.as_str());

        let mut outcome = DestroyOutcome {
            skipped: decision.skipped,
            ..Default::default()
        };

        for (idx, &name) in decision.approved.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(dataset = dataset.as_str(), "Cancelled, keeping remaining snapshots");
                outcome.skipped.extend(
                    decision.approved[idx..]
                        .iter()
                        .map(|&n| (n, SkipReason::Cancelled)),
                );
                break;
            }

            if let Err(violation) =
                check_destroy_allowed(&dataset, name, timeline.newest(), state, replication_required)
            {
                let err: ExError = violation.into();
                self.cancel.cancel();
                crate::log_op_error!(
                    "safe_destroy",
                    err.clone(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    dataset = dataset.as_str(),
                    destroyed = outcome.destroyed.len() as u64
                );
                outcome.violation = Some(err);
                return outcome;
            }

            let snapshot = Snapshot::new(dataset.as_str(), name);
            match self.storage.has_clones(&snapshot) {
                Ok(true) => {
                    warn!(snapshot = %snapshot, "Snapshot has clones, not destroying");
                    outcome.skipped.push((name, SkipReason::HasClones));
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    outcome.errors.push(
                        e.with_op("has_clones")
                            .with_dataset(dataset.as_str())
                            .with_snapshot(snapshot.to_string()),
                    );
                    continue;
                }
            }

            match self.storage.destroy_snapshot(&snapshot) {
                Ok(()) => {
                    timeline.remove_local(name);
                    outcome.destroyed.push(name);
                }
                // A clone appeared between the check and the destroy
                Err(e) if e.kind() == ExErrorKind::HasClones => {
                    warn!(snapshot = %snapshot, "Snapshot has clones, not destroying");
                    outcome.skipped.push((name, SkipReason::HasClones));
                }
                Err(e) => {
                    outcome.errors.push(
                        e.with_op("destroy_snapshot")
                            .with_dataset(dataset.as_str())
                            .with_snapshot(snapshot.to_string()),
                    );
                }
            }
        }

        crate::log_op_end!(
            "safe_destroy",
            duration_ms = start.elapsed().as_millis() as u64,
            dataset = dataset.as_str(),
            destroyed = outcome.destroyed.len() as u64,
            skipped = outcome.skipped.len() as u64
        );
        outcome
    }
}
