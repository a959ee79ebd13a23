use zretain_core::gate::DestroyOutcome;
use zretain_core::memory::{MemoryStorage, MemoryTransport};
use zretain_core::{
    compute_destroy_candidates, filter_safe_to_destroy, CancellationFlag, ReplicationResult,
    ReplicationTransport,
    RetentionPolicy, SafeDestroyGate, SnapshotName, Synchronizer, Timeline,
};

pub const DATASET: &str = "tank/vms/win10";
pub const REMOTE: &str = "backup/vms/win10";

#[allow(dead_code)]
pub fn n(secs: u64) -> SnapshotName {
    SnapshotName::from_unix_seconds(secs)
}

#[allow(dead_code)]
pub fn names(raw: &[u64]) -> Vec<SnapshotName> {
    raw.iter().copied().map(n).collect()
}

/// Load the replicated timeline of `DATASET`
#[allow(dead_code)]
pub fn load(storage: &MemoryStorage, transport: &MemoryTransport) -> Timeline {
    let remote: (&dyn ReplicationTransport, &str) = (transport, REMOTE);
    Timeline::load(DATASET, storage, Some(remote)).expect("local timeline loads")
}

/// Sync, then retention through the gate, the way one dataset pipeline does
#[allow(dead_code)]
pub fn sync_and_retain(
    storage: &MemoryStorage,
    transport: &MemoryTransport,
    limit: u32,
) -> (ReplicationResult, DestroyOutcome) {
    let cancel = CancellationFlag::new();
    let mut timeline = load(storage, transport);

    let sync = Synchronizer::new(transport, &cancel).synchronize(&mut timeline);

    let candidates = compute_destroy_candidates(timeline.local(), RetentionPolicy::new(limit));
    let decision = filter_safe_to_destroy(&candidates, Some(&sync.state), true);
    let outcome = SafeDestroyGate::new(storage, &cancel).destroy(
        &mut timeline,
        decision,
        Some(&sync.state),
        true,
    );
    assert!(outcome.violation.is_none(), "no safety violation");
    (sync, outcome)
}
