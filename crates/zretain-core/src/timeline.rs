//! Per-dataset snapshot timeline
//!
//! The ordered local view of a dataset plus, when it replicates, what the
//! remote side reported at query time. Only managed (timestamp named)
//! snapshots take part; anything else an operator created by hand is
//! counted and otherwise ignored.

use crate::driver::{ReplicationTransport, StorageDriver};
use crate::errors::{ErrorClass, ExError, Result};
use crate::model::SnapshotName;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::warn;

/// What the remote side is known to hold for a dataset
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteView {
    /// Dataset does not replicate
    NotConfigured,
    /// The remote dataset does not exist yet; the first send is a full stream
    Absent,
    /// The remote dataset exists; managed names present at query time
    Known(BTreeSet<SnapshotName>),
    /// The remote query failed; nothing may be assumed about the remote
    Unavailable(ExError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    dataset: String,
    remote_dataset: Option<String>,
    local: Vec<SnapshotName>,
    foreign_local: usize,
    remote: RemoteView,
}

impl Timeline {
    /// Build a timeline from already known parts. Local names are sorted.
    pub fn from_parts(
        dataset: impl Into<String>,
        mut local: Vec<SnapshotName>,
        remote: RemoteView,
    ) -> Self {
        local.sort();
        local.dedup();
        Self {
            dataset: dataset.into(),
            remote_dataset: None,
            local,
            foreign_local: 0,
            remote,
        }
    }

    pub fn with_remote_dataset(mut self, remote_dataset: impl Into<String>) -> Self {
        self.remote_dataset = Some(remote_dataset.into());
        self
    }

    /// Query the storage driver and, when `remote` is given, the transport
    ///
    /// # Errors
    ///
    /// Only a failed local query is an error. A failed remote query is kept
    /// in the timeline as [`RemoteView::Unavailable`] so the dataset can
    /// still be snapshotted and retained conservatively.
    pub fn load(
        dataset: &str,
        storage: &dyn StorageDriver,
        remote: Option<(&dyn ReplicationTransport, &str)>,
    ) -> Result<Self> {
        let start = Instant::now();
        crate::log_op_start!("load_timeline", dataset = dataset);

        let raw_local = storage.list_snapshots(dataset).map_err(|e| {
            let err = e.with_dataset(dataset);
            crate::log_op_error!(
                "load_timeline",
                err.clone(),
                duration_ms = start.elapsed().as_millis() as u64,
                dataset = dataset
            );
            err
        })?;

        let (local, foreign_local) = partition_managed(&raw_local);
        if foreign_local > 0 {
            warn!(
                dataset = dataset,
                foreign = foreign_local,
                "Ignoring snapshots not named by zretain"
            );
        }

        let (remote_dataset, remote) = match remote {
            None => (None, RemoteView::NotConfigured),
            Some((transport, remote_dataset)) => {
                let view = match transport.list_remote_snapshots(remote_dataset) {
                    Ok(None) => RemoteView::Absent,
                    Ok(Some(names)) => {
                        RemoteView::Known(partition_managed(&names).0.into_iter().collect())
                    }
                    Err(e) => RemoteView::Unavailable(
                        e.with_class(ErrorClass::Transport)
                            .with_dataset(dataset)
                            .with_op("list_remote_snapshots"),
                    ),
                };
                (Some(remote_dataset.to_string()), view)
            }
        };

        let mut timeline = Self::from_parts(dataset, local, remote);
        timeline.remote_dataset = remote_dataset;
        timeline.foreign_local = foreign_local;

        crate::log_op_end!(
            "load_timeline",
            duration_ms = start.elapsed().as_millis() as u64,
            dataset = dataset,
            local_len = timeline.local.len() as u64,
            remote_len = timeline.remote_names().map(|r| r.len()).unwrap_or(0) as u64
        );
        Ok(timeline)
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn remote_dataset(&self) -> Option<&str> {
        self.remote_dataset.as_deref()
    }

    /// Managed local snapshots, oldest first
    pub fn local(&self) -> &[SnapshotName] {
        &self.local
    }

    /// Number of unmanaged local snapshots that were ignored
    pub fn foreign_local(&self) -> usize {
        self.foreign_local
    }

    pub fn newest(&self) -> Option<SnapshotName> {
        self.local.last().copied()
    }

    pub fn remote(&self) -> &RemoteView {
        &self.remote
    }

    /// Remote names, when known
    pub fn remote_names(&self) -> Option<&BTreeSet<SnapshotName>> {
        match &self.remote {
            RemoteView::Known(names) => Some(names),
            _ => None,
        }
    }

    pub fn replicates(&self) -> bool {
        !matches!(self.remote, RemoteView::NotConfigured)
    }

    /// Newest local snapshot confirmed present on the remote
    pub fn high_water_mark(&self) -> Option<SnapshotName> {
        let remote = self.remote_names()?;
        self.local
            .iter()
            .rev()
            .find(|name| remote.contains(name))
            .copied()
    }

    /// Local snapshots newer than the high-water mark, oldest first
    pub fn pending(&self) -> Vec<SnapshotName> {
        match self.remote {
            RemoteView::Absent => return self.local.clone(),
            RemoteView::Known(_) => {}
            RemoteView::NotConfigured | RemoteView::Unavailable(_) => return Vec::new(),
        }
        let hwm = self.high_water_mark();
        self.local
            .iter()
            .filter(|name| hwm.map_or(true, |h| **name > h))
            .copied()
            .collect()
    }

    /// Record a snapshot created during this run
    pub fn push_local(&mut self, name: SnapshotName) {
        if let Err(pos) = self.local.binary_search(&name) {
            self.local.insert(pos, name);
        }
    }

    /// Record a destroyed local snapshot
    pub fn remove_local(&mut self, name: SnapshotName) {
        self.local.retain(|n| *n != name);
    }

    /// Record a transport acknowledgment
    ///
    /// The first acknowledged full stream creates the remote dataset.
    pub fn record_remote(&mut self, name: SnapshotName) {
        match &mut self.remote {
            RemoteView::Known(names) => {
                names.insert(name);
            }
            RemoteView::Absent => self.remote = RemoteView::Known(BTreeSet::from([name])),
            RemoteView::NotConfigured | RemoteView::Unavailable(_) => {}
        }
    }

    /// Record a destroyed remote snapshot
    pub fn forget_remote(&mut self, name: SnapshotName) {
        if let RemoteView::Known(names) = &mut self.remote {
            names.remove(&name);
        }
    }
}

fn partition_managed(raw: &[String]) -> (Vec<SnapshotName>, usize) {
    let mut managed = Vec::with_capacity(raw.len());
    let mut foreign = 0;
    for name in raw {
        match SnapshotName::parse_managed(name) {
            Some(n) => managed.push(n),
            None => foreign += 1,
        }
    }
    (managed, foreign)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[u64]) -> Vec<SnapshotName> {
        raw.iter().copied().map(SnapshotName::from_unix_seconds).collect()
    }

    fn known(raw: &[u64]) -> RemoteView {
        RemoteView::Known(names(raw).into_iter().collect())
    }

    #[test]
    fn test_local_is_sorted_and_deduplicated() {
        let t = Timeline::from_parts("tank/a", names(&[3, 1, 2, 3]), RemoteView::NotConfigured);
        assert_eq!(t.local(), names(&[1, 2, 3]).as_slice());
        assert_eq!(t.newest(), Some(SnapshotName::from_unix_seconds(3)));
    }

    #[test]
    fn test_high_water_mark_is_newest_common() {
        let t = Timeline::from_parts("tank/a", names(&[1, 2, 3, 4]), known(&[1, 2]));
        assert_eq!(t.high_water_mark(), Some(SnapshotName::from_unix_seconds(2)));
        assert_eq!(t.pending(), names(&[3, 4]));
    }

    #[test]
    fn test_absent_remote_means_everything_pending() {
        let t = Timeline::from_parts("tank/a", names(&[1, 2]), RemoteView::Absent);
        assert_eq!(t.high_water_mark(), None);
        assert_eq!(t.pending(), names(&[1, 2]));
        assert!(t.remote_names().is_none());
    }

    #[test]
    fn test_first_acknowledgment_creates_remote() {
        let mut t = Timeline::from_parts("tank/a", names(&[1, 2]), RemoteView::Absent);
        t.record_remote(SnapshotName::from_unix_seconds(1));
        assert_eq!(t.remote(), &known(&[1]));
        assert_eq!(t.high_water_mark(), Some(SnapshotName::from_unix_seconds(1)));
        assert_eq!(t.pending(), names(&[2]));
    }

    #[test]
    fn test_unavailable_remote_has_no_high_water_mark() {
        let err = ExError::new(crate::errors::ExErrorKind::Transport);
        let t = Timeline::from_parts("tank/a", names(&[1, 2]), RemoteView::Unavailable(err));
        assert_eq!(t.high_water_mark(), None);
        assert!(t.pending().is_empty());
        assert!(t.replicates());
    }

    #[test]
    fn test_record_remote_advances_high_water_mark() {
        let mut t = Timeline::from_parts("tank/a", names(&[1, 2, 3]), known(&[1]));
        t.record_remote(SnapshotName::from_unix_seconds(2));
        assert_eq!(t.high_water_mark(), Some(SnapshotName::from_unix_seconds(2)));
        assert_eq!(t.pending(), names(&[3]));
    }

    #[test]
    fn test_push_and_remove_local() {
        let mut t = Timeline::from_parts("tank/a", names(&[1, 3]), RemoteView::NotConfigured);
        t.push_local(SnapshotName::from_unix_seconds(2));
        t.push_local(SnapshotName::from_unix_seconds(2));
        assert_eq!(t.local(), names(&[1, 2, 3]).as_slice());
        t.remove_local(SnapshotName::from_unix_seconds(1));
        assert_eq!(t.local(), names(&[2, 3]).as_slice());
    }

    #[test]
    fn test_partition_managed_counts_foreign() {
        let raw = vec!["100".to_string(), "before-upgrade".to_string(), "99".to_string()];
        let (managed, foreign) = partition_managed(&raw);
        assert_eq!(managed, names(&[100, 99]));
        assert_eq!(foreign, 1);
    }
}
