//! Run report types.
//!
//! One `RunReport` per invocation, one `DatasetReport` per managed dataset
//! in configuration order. All types serialize to JSON for `--json` output.

use crate::errors::ExError;
use crate::gate::SkipReason;
use crate::model::{MarkerState, SnapshotName};
use crate::replication::SendStep;
use chrono::{DateTime, Utc};
use serde::Serialize;
use zretain_core_types::RunId;

/// Pipeline step that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LoadTimeline,
    QueryDomain,
    CreateSnapshot,
    WriteMarker,
    Replicate,
    PruneRemote,
    Destroy,
}

/// A dataset-scoped error as it appears in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedError {
    pub stage: Stage,
    /// Stable `ERR_*` code
    pub code: String,
    /// `config`, `driver`, `transport`, `safety` or `internal`
    pub class: String,
    pub message: String,
}

impl ReportedError {
    pub fn new(stage: Stage, err: &ExError) -> Self {
        Self {
            stage,
            code: err.code().to_string(),
            class: err.class().as_str().to_string(),
            message: err.to_string(),
        }
    }
}

/// A protected snapshot and why it was kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSnapshot {
    pub snapshot: SnapshotName,
    pub reason: SkipReason,
}

/// Overall result for one dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetOutcome {
    /// No errors
    Succeeded,
    /// Errors, but a snapshot was created, sent or destroyed
    Partial,
    /// Errors and no progress
    Failed,
}

/// Everything done (or, in a dry run, planned) for one dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetReport {
    pub dataset: String,
    /// Remote counterpart when the dataset replicates
    pub remote_dataset: Option<String>,
    pub created: Option<SnapshotName>,
    pub marker: Option<MarkerState>,
    pub sent: Vec<SendStep>,
    pub destroyed: Vec<SnapshotName>,
    pub remote_destroyed: Vec<SnapshotName>,
    pub skipped: Vec<SkippedSnapshot>,
    pub errors: Vec<ReportedError>,
    pub high_water_mark: Option<SnapshotName>,
    pub pending: usize,
    pub outcome: DatasetOutcome,
}

impl DatasetReport {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            remote_dataset: None,
            created: None,
            marker: None,
            sent: Vec::new(),
            destroyed: Vec::new(),
            remote_destroyed: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
            high_water_mark: None,
            pending: 0,
            outcome: DatasetOutcome::Succeeded,
        }
    }

    pub fn record_error(&mut self, stage: Stage, err: &ExError) {
        self.errors.push(ReportedError::new(stage, err));
    }

    pub fn record_skipped(&mut self, skipped: impl IntoIterator<Item = (SnapshotName, SkipReason)>) {
        self.skipped.extend(
            skipped
                .into_iter()
                .map(|(snapshot, reason)| SkippedSnapshot { snapshot, reason }),
        );
    }

    fn made_progress(&self) -> bool {
        self.created.is_some()
            || !self.sent.is_empty()
            || !self.destroyed.is_empty()
            || !self.remote_destroyed.is_empty()
    }

    /// Derive and store the outcome from the recorded errors and progress
    pub fn finish(&mut self) -> DatasetOutcome {
        self.outcome = if self.errors.is_empty() {
            DatasetOutcome::Succeeded
        } else if self.made_progress() {
            DatasetOutcome::Partial
        } else {
            DatasetOutcome::Failed
        };
        self.outcome
    }
}

/// Aggregated counters over all datasets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportTotals {
    pub created: usize,
    pub sent: usize,
    pub destroyed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
}

/// Report for one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub pool: String,
    /// Nothing was mutated; created/sent/destroyed are the plan
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub datasets: Vec<DatasetReport>,
}

impl RunReport {
    pub fn totals(&self) -> ReportTotals {
        let mut totals = ReportTotals::default();
        for ds in &self.datasets {
            totals.created += usize::from(ds.created.is_some());
            totals.sent += ds.sent.len();
            totals.destroyed += ds.destroyed.len() + ds.remote_destroyed.len();
            totals.skipped += ds.skipped.len();
            totals.errors += ds.errors.len();
            match ds.outcome {
                DatasetOutcome::Succeeded => totals.succeeded += 1,
                DatasetOutcome::Partial => totals.partial += 1,
                DatasetOutcome::Failed => totals.failed += 1,
            }
        }
        totals
    }

    /// True when every dataset succeeded
    pub fn is_clean(&self) -> bool {
        self.datasets
            .iter()
            .all(|d| d.outcome == DatasetOutcome::Succeeded)
    }

    pub fn dataset(&self, path: &str) -> Option<&DatasetReport> {
        self.datasets.iter().find(|d| d.dataset == path)
    }

    /// Pretty JSON encoding
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_json(&self) -> crate::errors::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExErrorKind;

    fn n(s: u64) -> SnapshotName {
        SnapshotName::from_unix_seconds(s)
    }

    #[test]
    fn test_outcome_classification() {
        let mut ds = DatasetReport::new("tank/a");
        assert_eq!(ds.finish(), DatasetOutcome::Succeeded);

        ds.record_error(Stage::Replicate, &ExError::new(ExErrorKind::Transport));
        assert_eq!(ds.finish(), DatasetOutcome::Failed);

        ds.created = Some(n(10));
        assert_eq!(ds.finish(), DatasetOutcome::Partial);
    }

    #[test]
    fn test_reported_error_carries_code_and_class() {
        let err = ExError::new(ExErrorKind::HasClones).with_message("busy");
        let reported = ReportedError::new(Stage::Destroy, &err);
        assert_eq!(reported.code, "ERR_HAS_CLONES");
        assert_eq!(reported.class, "driver");
    }

    #[test]
    fn test_totals_and_json() {
        let now = Utc::now();
        let mut a = DatasetReport::new("tank/a");
        a.created = Some(n(10));
        a.sent.push(SendStep::Full { to: n(10) });
        a.record_skipped([(n(5), SkipReason::HasClones)]);
        a.finish();

        let report = RunReport {
            run_id: RunId::new(),
            pool: "tank".into(),
            dry_run: false,
            started_at: now,
            finished_at: now,
            datasets: vec![a],
        };
        let totals = report.totals();
        assert_eq!(totals.created, 1);
        assert_eq!(totals.sent, 1);
        assert_eq!(totals.skipped, 1);
        assert!(report.is_clean());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["datasets"][0]["skipped"][0]["reason"], "has_clones");
        assert_eq!(json["datasets"][0]["sent"][0]["mode"], "full");
        assert_eq!(json["datasets"][0]["outcome"], "succeeded");
    }
}
