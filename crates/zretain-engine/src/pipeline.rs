//! Per-dataset pipeline
//!
//! ## Steps (in order):
//! 1. Load the timeline (local failure stops the dataset here)
//! 2. VM-bound only: query the domain's active state
//! 3. Create the next snapshot
//! 4. VM-bound only: write the `on`/`off` marker at the mountpoint
//! 5. Synchronize pending snapshots to the remote
//! 6. Secondary retention on the remote, after a clean sync
//! 7. Retention engine, gate, destroys (skipped when creation failed)
//!
//! Every failure is recorded in the report. A safety violation is also
//! handed back next to the report so the orchestrator can fail the run.

use crate::clock::Clock;
use std::time::Instant;
use tracing::{info, warn};
use zretain_core::driver::{ReplicationTransport, StorageDriver, VirtualizationQuery};
use zretain_core::errors::{ExError, ExErrorKind};
use zretain_core::gate::{GateDecision, SafeDestroyGate, SkipReason};
use zretain_core::model::{DatasetSpec, MarkerState, PoolConfig, RetentionPolicy, Snapshot, SnapshotName};
use zretain_core::replication::{plan_sends, ReplicationState, Synchronizer};
use zretain_core::report::{DatasetReport, Stage};
use zretain_core::retention::compute_destroy_candidates;
use zretain_core::timeline::Timeline;
use zretain_core::CancellationFlag;
use zretain_store::marker::write_marker;

/// Splits retention candidates into approved and protected snapshots
pub(crate) type DecisionFilter =
    fn(&[SnapshotName], Option<&ReplicationState>, bool) -> GateDecision;

/// Collaborators shared by every dataset of one run
pub(crate) struct PipelineContext<'a> {
    pub pool: &'a PoolConfig,
    pub filter: DecisionFilter,
    pub storage: &'a dyn StorageDriver,
    pub transport: Option<&'a dyn ReplicationTransport>,
    pub domains: Option<&'a dyn VirtualizationQuery>,
    pub clock: &'a dyn Clock,
    pub cancel: &'a CancellationFlag,
}

/// Report of one dataset and the safety violation that stopped it, if any
pub(crate) struct DatasetRun {
    pub report: DatasetReport,
    pub violation: Option<ExError>,
}

impl DatasetRun {
    pub fn planned(report: DatasetReport) -> Self {
        Self {
            report,
            violation: None,
        }
    }
}

impl<'a> PipelineContext<'a> {
    /// `(transport, remote dataset)` when this dataset replicates
    fn remote_for(&self, spec: &DatasetSpec) -> Option<(&'a dyn ReplicationTransport, String)> {
        let target = self.pool.replication_for(spec)?;
        let transport = self.transport?;
        Some((transport, target.remote_dataset_for(&self.pool.name, &spec.path)))
    }

    fn load_timeline(&self, spec: &DatasetSpec, report: &mut DatasetReport) -> Option<Timeline> {
        let remote = self.remote_for(spec);
        report.remote_dataset = remote.as_ref().map(|(_, ds)| ds.clone());
        let remote_arg: Option<(&dyn ReplicationTransport, &str)> =
            remote.as_ref().map(|(t, ds)| (*t, ds.as_str()));

        match Timeline::load(&spec.path, self.storage, remote_arg) {
            Ok(timeline) => Some(timeline),
            Err(e) => {
                report.record_error(Stage::LoadTimeline, &e);
                None
            }
        }
    }

    fn next_name(
        &self,
        spec: &DatasetSpec,
        timeline: &Timeline,
        report: &mut DatasetReport,
    ) -> Option<SnapshotName> {
        match SnapshotName::next_after(self.clock.now_unix_seconds(), timeline.newest()) {
            Ok(name) => Some(name),
            Err(e) => {
                let err = ExError::from(e)
                    .with_op("create_snapshot")
                    .with_dataset(spec.path.as_str());
                report.record_error(Stage::CreateSnapshot, &err);
                None
            }
        }
    }

    fn query_marker(&self, spec: &DatasetSpec, report: &mut DatasetReport) -> Option<MarkerState> {
        let domain = spec.domain()?;
        let query = match self.domains {
            Some(q) => q,
            None => {
                let err = ExError::new(ExErrorKind::Internal)
                    .with_op("list_active_domains")
                    .with_dataset(spec.path.as_str())
                    .with_message("no hypervisor session for a VM dataset");
                report.record_error(Stage::QueryDomain, &err);
                return None;
            }
        };
        match query.list_active_domains() {
            Ok(active) => Some(MarkerState::from_active(active.iter().any(|d| d == domain))),
            Err(e) => {
                report.record_error(Stage::QueryDomain, &e.with_dataset(spec.path.as_str()));
                None
            }
        }
    }
}

/// Run the full pipeline for one dataset
pub(crate) fn execute(ctx: &PipelineContext<'_>, spec: &DatasetSpec) -> DatasetRun {
    let start = Instant::now();
    zretain_core::log_op_start!("dataset_pipeline", dataset = spec.path.as_str());

    let mut report = DatasetReport::new(spec.path.as_str());
    let Some(mut timeline) = ctx.load_timeline(spec, &mut report) else {
        report.finish();
        return finish(report, None, start);
    };

    // State is captured before the snapshot so the marker describes it
    let marker = ctx.query_marker(spec, &mut report);

    let created = match ctx.next_name(spec, &timeline, &mut report) {
        Some(name) => {
            let snapshot = Snapshot::new(spec.path.as_str(), name);
            match ctx.storage.create_snapshot(&snapshot) {
                Ok(()) => {
                    timeline.push_local(name);
                    report.created = Some(name);
                    info!(snapshot = %snapshot, "Created snapshot");
                    true
                }
                Err(e) => {
                    report.record_error(
                        Stage::CreateSnapshot,
                        &e.with_dataset(spec.path.as_str()).with_snapshot(snapshot.to_string()),
                    );
                    false
                }
            }
        }
        None => false,
    };

    if let (true, Some(state)) = (created, marker) {
        match ctx
            .storage
            .get_mountpoint(&spec.path)
            .and_then(|mountpoint| write_marker(&mountpoint, state))
        {
            Ok(path) => {
                report.marker = Some(state);
                info!(dataset = spec.path.as_str(), marker = %path.display(), "Wrote state marker");
            }
            Err(e) => report.record_error(Stage::WriteMarker, &e.with_dataset(spec.path.as_str())),
        }
    }

    let replication_required = timeline.replicates();
    let mut state: Option<ReplicationState> = None;
    if let Some(transport) = ctx.transport.filter(|_| replication_required) {
        let synchronizer = Synchronizer::new(transport, ctx.cancel);
        let sync = synchronizer.synchronize(&mut timeline);
        report.sent = sync.sent.clone();
        let clean = sync.error.is_none();
        if let Some(err) = &sync.error {
            report.record_error(Stage::Replicate, err);
        }

        let secondary = ctx
            .pool
            .replication_for(spec)
            .and_then(|target| target.secondary_retention);
        if let (true, Some(policy)) = (clean, secondary) {
            let pruned = synchronizer.prune_remote(&mut timeline, policy);
            report.remote_destroyed = pruned.destroyed;
            if let Some(err) = pruned.error {
                report.record_error(Stage::PruneRemote, &err);
            }
        }
        state = Some(sync.state);
    }

    if let Some(s) = &state {
        report.high_water_mark = s.high_water_mark;
        report.pending = s.pending.len();
    }

    let mut violation = None;
    if created {
        let policy = ctx.pool.effective_retention(spec);
        let candidates = compute_destroy_candidates(timeline.local(), policy);
        let decision = (ctx.filter)(&candidates, state.as_ref(), replication_required);
        let outcome = SafeDestroyGate::new(ctx.storage, ctx.cancel).destroy(
            &mut timeline,
            decision,
            state.as_ref(),
            replication_required,
        );
        report.destroyed = outcome.destroyed;
        report.record_skipped(outcome.skipped);
        for err in &outcome.errors {
            report.record_error(Stage::Destroy, err);
        }
        if let Some(err) = &outcome.violation {
            report.record_error(Stage::Destroy, err);
        }
        violation = outcome.violation;
    } else {
        warn!(dataset = spec.path.as_str(), "No snapshot created, retention skipped");
    }

    report.finish();
    finish(report, violation, start)
}

/// Compute what [`execute`] would do without issuing any mutation
///
/// Reads (timeline, active domains, clone checks) still run.
pub(crate) fn plan(ctx: &PipelineContext<'_>, spec: &DatasetSpec) -> DatasetReport {
    let start = Instant::now();
    zretain_core::log_op_start!("dataset_plan", dataset = spec.path.as_str());

    let mut report = DatasetReport::new(spec.path.as_str());
    let Some(mut timeline) = ctx.load_timeline(spec, &mut report) else {
        report.finish();
        return report;
    };

    report.marker = ctx.query_marker(spec, &mut report);

    if let Some(name) = ctx.next_name(spec, &timeline, &mut report) {
        timeline.push_local(name);
        report.created = Some(name);
    }

    let replication_required = timeline.replicates();
    let mut state: Option<ReplicationState> = None;
    if replication_required {
        match plan_sends(&timeline) {
            Ok(steps) => {
                for step in &steps {
                    timeline.record_remote(step.target());
                }
                report.sent = steps;
                if let Some(policy) = ctx
                    .pool
                    .replication_for(spec)
                    .and_then(|target| target.secondary_retention)
                {
                    report.remote_destroyed = planned_remote_prune(&timeline, policy);
                }
            }
            Err(e) => report.record_error(Stage::Replicate, &e),
        }
        state = Some(ReplicationState::from_timeline(&timeline));
    }

    if let Some(s) = &state {
        report.high_water_mark = s.high_water_mark;
        report.pending = s.pending.len();
    }

    if report.created.is_some() {
        let policy = ctx.pool.effective_retention(spec);
        let candidates = compute_destroy_candidates(timeline.local(), policy);
        let decision = (ctx.filter)(&candidates, state.as_ref(), replication_required);
        report.record_skipped(decision.skipped);
        for name in decision.approved {
            match ctx.storage.has_clones(&Snapshot::new(spec.path.as_str(), name)) {
                Ok(true) => report.record_skipped([(name, SkipReason::HasClones)]),
                Ok(false) => report.destroyed.push(name),
                Err(e) => report.record_error(Stage::Destroy, &e.with_dataset(spec.path.as_str())),
            }
        }
    }

    report.finish();
    zretain_core::log_op_end!(
        "dataset_plan",
        duration_ms = start.elapsed().as_millis() as u64,
        dataset = spec.path.as_str()
    );
    report
}

fn planned_remote_prune(timeline: &Timeline, policy: RetentionPolicy) -> Vec<SnapshotName> {
    let (Some(hwm), Some(remote)) = (timeline.high_water_mark(), timeline.remote_names()) else {
        return Vec::new();
    };
    let remote: Vec<SnapshotName> = remote.iter().copied().collect();
    compute_destroy_candidates(&remote, policy)
        .into_iter()
        .filter(|name| *name < hwm)
        .collect()
}

fn finish(report: DatasetReport, violation: Option<ExError>, start: Instant) -> DatasetRun {
    zretain_core::log_op_end!(
        "dataset_pipeline",
        duration_ms = start.elapsed().as_millis() as u64,
        dataset = report.dataset.as_str(),
        created = report.created.is_some(),
        sent = report.sent.len() as u64,
        destroyed = report.destroyed.len() as u64,
        errors = report.errors.len() as u64
    );
    DatasetRun { report, violation }
}
