#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end checks of timeline, synchronizer, retention and gate working
//! together over the in-memory collaborators.

mod common;

use common::{load, n, names, sync_and_retain, DATASET, REMOTE};
use zretain_core::gate::SkipReason;
use zretain_core::memory::{MemoryStorage, MemoryTransport};
use zretain_core::{
    compute_destroy_candidates, filter_safe_to_destroy, plan_sends, CancellationFlag, ExErrorKind,
    RetentionPolicy, SafeDestroyGate, SendStep, Synchronizer, Timeline,
};

#[test]
fn test_retention_without_replication_keeps_floor() {
    // GIVEN five local snapshots and no replication
    let storage = MemoryStorage::new().with_dataset(DATASET, &[1, 2, 3, 4, 5]);
    let cancel = CancellationFlag::new();
    let mut timeline = Timeline::load(DATASET, &storage, None).unwrap();

    // WHEN retention runs with a limit of zero
    let candidates = compute_destroy_candidates(timeline.local(), RetentionPolicy::new(0));
    let decision = filter_safe_to_destroy(&candidates, None, false);
    let outcome = SafeDestroyGate::new(&storage, &cancel).destroy(&mut timeline, decision, None, false);

    // THEN only the newest snapshot survives
    assert_eq!(outcome.destroyed, names(&[1, 2, 3, 4]));
    assert_eq!(storage.managed(DATASET), vec![5]);
}

#[test]
fn test_incremental_chain_advances_high_water_mark() {
    // GIVEN local [1,2,3] and remote {1}
    let storage = MemoryStorage::new().with_dataset(DATASET, &[1, 2, 3]);
    let transport = MemoryTransport::new().with_remote(REMOTE, &[1]);
    let cancel = CancellationFlag::new();
    let mut timeline = load(&storage, &transport);

    // WHEN synchronizing
    let result = Synchronizer::new(&transport, &cancel).synchronize(&mut timeline);

    // THEN 2 is sent from 1, then 3 from 2
    assert_eq!(
        result.sent,
        vec![
            SendStep::Incremental { from: n(1), to: n(2) },
            SendStep::Incremental { from: n(2), to: n(3) },
        ]
    );
    assert_eq!(result.high_water_mark, Some(n(3)));
    assert!(result.error.is_none());
    assert_eq!(transport.remote_snapshots(REMOTE), vec![1, 2, 3]);
}

#[test]
fn test_absent_remote_starts_with_full_send() {
    // GIVEN a remote dataset that does not exist yet
    let storage = MemoryStorage::new().with_dataset(DATASET, &[10, 20]);
    let transport = MemoryTransport::new();
    let cancel = CancellationFlag::new();
    let mut timeline = load(&storage, &transport);

    // WHEN synchronizing
    let result = Synchronizer::new(&transport, &cancel).synchronize(&mut timeline);

    // THEN the earliest pending snapshot is sent in full, never incrementally
    assert_eq!(result.sent[0], SendStep::Full { to: n(10) });
    assert_eq!(result.sent[1], SendStep::Incremental { from: n(10), to: n(20) });
    assert_eq!(
        transport.sends(),
        vec![
            format!("full:{}@10", REMOTE),
            format!("incr:{}@10..20", REMOTE),
        ]
    );
}

#[test]
fn test_second_sync_sends_nothing() {
    // GIVEN a dataset synchronized once
    let storage = MemoryStorage::new().with_dataset(DATASET, &[1, 2]);
    let transport = MemoryTransport::new();
    let cancel = CancellationFlag::new();
    let mut timeline = load(&storage, &transport);
    Synchronizer::new(&transport, &cancel).synchronize(&mut timeline);

    // WHEN synchronizing again with no new snapshots
    let reloaded = load(&storage, &transport);

    // THEN the send-set is empty
    assert!(plan_sends(&reloaded).unwrap().is_empty());
    let mut reloaded = reloaded;
    let result = Synchronizer::new(&transport, &cancel).synchronize(&mut reloaded);
    assert!(result.sent.is_empty());
    assert_eq!(transport.sends().len(), 2);
}

#[test]
fn test_gate_protects_high_water_mark_and_unreplicated() {
    // GIVEN limit 2, local [1..4], remote {1,2} and a failing send of 3
    let storage = MemoryStorage::new().with_dataset(DATASET, &[1, 2, 3, 4]);
    let transport = MemoryTransport::new()
        .with_remote(REMOTE, &[1, 2])
        .with_failure("send_incremental", &format!("{}@3", DATASET), ExErrorKind::Transport);

    // WHEN the dataset is synchronized and retained
    let (sync, outcome) = sync_and_retain(&storage, &transport, 2);

    // THEN 1 and 2 are nominated, only 1 is destroyed
    assert_eq!(sync.high_water_mark, Some(n(2)));
    assert_eq!(sync.failed, names(&[3]));
    assert_eq!(outcome.destroyed, names(&[1]));
    assert_eq!(outcome.skipped, vec![(n(2), SkipReason::HighWaterMark)]);
    assert_eq!(storage.managed(DATASET), vec![2, 3, 4]);
}

#[test]
fn test_snapshot_with_clones_is_skipped_not_failed() {
    // GIVEN a fully replicated dataset whose oldest snapshot has a clone
    let storage = MemoryStorage::new()
        .with_dataset(DATASET, &[1, 2, 3, 4])
        .with_clone_of(&format!("{}@1", DATASET));
    let transport = MemoryTransport::new().with_remote(REMOTE, &[1, 2, 3, 4]);

    // WHEN retention keeps one snapshot
    let (_, outcome) = sync_and_retain(&storage, &transport, 1);

    // THEN the cloned snapshot is skipped and the rest below the mark go
    assert!(outcome.errors.is_empty());
    assert!(outcome.skipped.contains(&(n(1), SkipReason::HasClones)));
    assert_eq!(outcome.destroyed, names(&[2, 3]));
    assert_eq!(storage.managed(DATASET), vec![1, 4]);
}

#[test]
fn test_remote_list_failure_destroys_nothing() {
    // GIVEN a remote that cannot be listed
    let storage = MemoryStorage::new().with_dataset(DATASET, &[1, 2, 3, 4]);
    let transport =
        MemoryTransport::new().with_failure("list_remote_snapshots", REMOTE, ExErrorKind::Timeout);

    // WHEN the dataset is synchronized and retained
    let (sync, outcome) = sync_and_retain(&storage, &transport, 1);

    // THEN no sends happen and every candidate is protected
    assert!(sync.sent.is_empty());
    assert_eq!(sync.error.as_ref().map(|e| e.kind()), Some(ExErrorKind::Timeout));
    assert!(outcome.destroyed.is_empty());
    assert_eq!(storage.managed(DATASET), vec![1, 2, 3, 4]);
}

#[test]
fn test_diverged_remote_is_reported() {
    // GIVEN a remote whose snapshots share nothing with the local side
    let storage = MemoryStorage::new().with_dataset(DATASET, &[5, 6]);
    let transport = MemoryTransport::new().with_remote(REMOTE, &[1, 2]);

    // WHEN synchronizing
    let (sync, outcome) = sync_and_retain(&storage, &transport, 0);

    // THEN the error is a missing common base and nothing is destroyed
    assert_eq!(
        sync.error.as_ref().map(|e| e.kind()),
        Some(ExErrorKind::NoCommonSnapshot)
    );
    assert!(outcome.destroyed.is_empty());
}

#[test]
fn test_remote_with_only_foreign_snapshots_is_no_common_snapshot() {
    // GIVEN a remote dataset that exists but holds only a hand-made snapshot
    let storage = MemoryStorage::new().with_dataset(DATASET, &[1, 2, 3, 4, 5]);
    let transport = MemoryTransport::new().with_raw_remote(REMOTE, &["manual-seed"]);

    // WHEN synchronizing and retaining
    let (sync, outcome) = sync_and_retain(&storage, &transport, 1);

    // THEN no full stream is attempted and the cause is named
    assert_eq!(
        sync.error.as_ref().map(|e| e.kind()),
        Some(ExErrorKind::NoCommonSnapshot)
    );
    assert!(sync.failed.is_empty());
    assert!(transport.sends().is_empty());
    assert!(outcome.destroyed.is_empty());
    assert_eq!(storage.managed(DATASET), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_existing_empty_remote_is_no_common_snapshot() {
    // GIVEN a remote dataset that exists with no snapshots at all
    let storage = MemoryStorage::new().with_dataset(DATASET, &[1, 2]);
    let transport = MemoryTransport::new().with_raw_remote(REMOTE, &[]);
    let timeline = load(&storage, &transport);

    // WHEN planning sends
    let err = plan_sends(&timeline).unwrap_err();

    // THEN it is not treated as a first replication
    assert_eq!(err.kind(), ExErrorKind::NoCommonSnapshot);
}

#[test]
fn test_cancellation_stops_next_send_but_keeps_progress() {
    // GIVEN a transport that raises cancellation after its first transfer
    let cancel = CancellationFlag::new();
    let storage = MemoryStorage::new().with_dataset(DATASET, &[1, 2, 3]);
    let transport = MemoryTransport::new().cancel_after_first_send(cancel.clone());
    let mut timeline = load(&storage, &transport);

    // WHEN synchronizing
    let result = Synchronizer::new(&transport, &cancel).synchronize(&mut timeline);

    // THEN the first transfer counts and no further transfer starts
    assert_eq!(result.sent, vec![SendStep::Full { to: n(1) }]);
    assert_eq!(result.high_water_mark, Some(n(1)));
    assert_eq!(result.error.as_ref().map(|e| e.kind()), Some(ExErrorKind::Cancelled));
}

#[test]
fn test_foreign_snapshots_are_never_touched() {
    // GIVEN a hand-made snapshot among managed ones
    let storage = MemoryStorage::new().with_raw_dataset(DATASET, &["1", "before-upgrade", "2", "3"]);
    let transport = MemoryTransport::new().with_remote(REMOTE, &[1, 2, 3]);

    // WHEN retention keeps one snapshot
    let (_, outcome) = sync_and_retain(&storage, &transport, 1);

    // THEN only managed snapshots are destroyed
    assert_eq!(outcome.destroyed, names(&[1, 2]));
    assert_eq!(storage.snapshots(DATASET), vec!["before-upgrade", "3"]);
}

#[test]
fn test_secondary_retention_prunes_only_below_mark() {
    // GIVEN a remote with more snapshots than its retention allows
    let storage = MemoryStorage::new().with_dataset(DATASET, &[3, 4]);
    let transport = MemoryTransport::new().with_remote(REMOTE, &[1, 2, 3]);
    let cancel = CancellationFlag::new();
    let mut timeline = load(&storage, &transport);
    let sync = Synchronizer::new(&transport, &cancel);
    sync.synchronize(&mut timeline);

    // WHEN pruning the remote to one snapshot
    let pruned = sync.prune_remote(&mut timeline, RetentionPolicy::new(1));

    // THEN everything older than the high-water mark goes, the mark stays
    assert!(pruned.error.is_none());
    assert_eq!(pruned.destroyed, names(&[1, 2, 3]));
    assert_eq!(transport.remote_snapshots(REMOTE), vec![4]);
}
