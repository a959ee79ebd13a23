//! Retention engine
//!
//! Pure selection of the snapshots a retention limit makes surplus. Nothing
//! here destroys anything; candidates go through the safe-destroy gate.

use crate::model::{RetentionPolicy, SnapshotName};

/// Oldest-first snapshots beyond `policy`, given an oldest-first timeline
///
/// Only strictly excess snapshots are nominated: a timeline of exactly
/// `limit` snapshots yields nothing. The newest snapshot is never a
/// candidate, so a limit of 0 still leaves one restore point.
pub fn compute_destroy_candidates(
    snapshots: &[SnapshotName],
    policy: RetentionPolicy,
) -> Vec<SnapshotName> {
    let len = snapshots.len();
    if len <= policy.limit() {
        return Vec::new();
    }
    let excess = (len - policy.limit()).min(len - 1);
    snapshots[..excess].to_vec()
}
