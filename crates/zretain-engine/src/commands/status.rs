//! Read-only status of every dataset in a pool

use serde::Serialize;
use zretain_core::driver::{ReplicationTransport, StorageDriver};
use zretain_core::model::{MarkerState, PoolConfig, SnapshotName};
use zretain_core::timeline::{RemoteView, Timeline};
use zretain_store::marker::read_marker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetStatus {
    pub dataset: String,
    pub remote_dataset: Option<String>,
    pub local_count: usize,
    /// Unmanaged snapshots, never touched
    pub foreign_count: usize,
    pub newest: Option<SnapshotName>,
    pub high_water_mark: Option<SnapshotName>,
    /// Local snapshots not on the remote; `None` without a usable remote view
    pub pending: Option<usize>,
    /// VM-bound only: state marker found at the mountpoint
    pub marker: Option<MarkerState>,
    pub error: Option<String>,
}

/// Inspect every dataset of `pool` without mutating anything
///
/// Failures are reported per dataset, never as a whole-call error.
pub fn pool_status(
    pool: &PoolConfig,
    storage: &dyn StorageDriver,
    transport: Option<&dyn ReplicationTransport>,
) -> Vec<DatasetStatus> {
    pool.datasets
        .iter()
        .map(|spec| {
            let remote_dataset = pool
                .replication_for(spec)
                .map(|target| target.remote_dataset_for(&pool.name, &spec.path));
            let remote: Option<(&dyn ReplicationTransport, &str)> = match (transport, &remote_dataset) {
                (Some(t), Some(ds)) => Some((t, ds.as_str())),
                _ => None,
            };

            let mut status = DatasetStatus {
                dataset: spec.path.clone(),
                remote_dataset: remote_dataset.clone(),
                local_count: 0,
                foreign_count: 0,
                newest: None,
                high_water_mark: None,
                pending: None,
                marker: None,
                error: None,
            };

            if spec.domain().is_some() {
                status.marker = storage
                    .get_mountpoint(&spec.path)
                    .ok()
                    .and_then(|mountpoint| read_marker(&mountpoint));
            }

            match Timeline::load(&spec.path, storage, remote) {
                Ok(timeline) => {
                    status.local_count = timeline.local().len();
                    status.foreign_count = timeline.foreign_local();
                    status.newest = timeline.newest();
                    match timeline.remote() {
                        RemoteView::Known(_) | RemoteView::Absent => {
                            status.high_water_mark = timeline.high_water_mark();
                            status.pending = Some(timeline.pending().len());
                        }
                        RemoteView::Unavailable(err) => status.error = Some(err.to_string()),
                        RemoteView::NotConfigured => {}
                    }
                }
                Err(err) => status.error = Some(err.to_string()),
            }
            status
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use zretain_core::errors::ExErrorKind;
    use zretain_core::memory::{MemoryStorage, MemoryTransport};
    use zretain_core::model::{DatasetSpec, ReplicationTarget, RetentionPolicy};
    use zretain_store::marker::write_marker;

    fn n(s: u64) -> SnapshotName {
        SnapshotName::from_unix_seconds(s)
    }

    fn pool() -> PoolConfig {
        PoolConfig::new("tank", RetentionPolicy::new(10))
            .with_dataset(DatasetSpec::regular("tank/home"))
            .with_dataset(DatasetSpec::regular("tank/scratch").without_replication())
            .with_replication(ReplicationTarget::new("backup.lan", "backup"))
    }

    #[test]
    fn test_status_reports_counts_and_high_water_mark() {
        let storage = MemoryStorage::new()
            .with_dataset("tank/home", &[100, 200, 300])
            .with_raw_dataset("tank/scratch", &["manual", "1000"]);
        let transport = MemoryTransport::new().with_remote("backup/home", &[100, 200]);

        let statuses = pool_status(&pool(), &storage, Some(&transport));

        assert_eq!(statuses[0].local_count, 3);
        assert_eq!(statuses[0].newest, Some(n(300)));
        assert_eq!(statuses[0].high_water_mark, Some(n(200)));
        assert_eq!(statuses[0].pending, Some(1));
        assert_eq!(statuses[0].remote_dataset.as_deref(), Some("backup/home"));

        assert_eq!(statuses[1].local_count, 1);
        assert_eq!(statuses[1].foreign_count, 1);
        assert_eq!(statuses[1].pending, None);
        assert!(statuses[1].remote_dataset.is_none());
    }

    #[test]
    fn test_status_keeps_going_after_a_failed_dataset() {
        let storage = MemoryStorage::new()
            .with_dataset("tank/home", &[100])
            .with_dataset("tank/scratch", &[100])
            .with_failure("list_snapshots", "tank/home", ExErrorKind::Driver);
        let transport = MemoryTransport::new();

        let statuses = pool_status(&pool(), &storage, Some(&transport));

        assert!(statuses[0].error.is_some());
        assert!(statuses[1].error.is_none());
        assert_eq!(statuses[1].local_count, 1);
    }

    #[test]
    fn test_status_reads_vm_marker() {
        let mount = tempfile::TempDir::new().unwrap();
        write_marker(mount.path(), MarkerState::Off).unwrap();
        let pool = PoolConfig::new("tank", RetentionPolicy::new(10))
            .with_dataset(DatasetSpec::vm_bound("tank/vms/win10", "win10"))
            .with_dataset(DatasetSpec::regular("tank/home"));
        let storage = MemoryStorage::new()
            .with_dataset("tank/vms/win10", &[100])
            .with_mountpoint("tank/vms/win10", mount.path())
            .with_dataset("tank/home", &[100]);

        let statuses = pool_status(&pool, &storage, None);

        assert_eq!(statuses[0].marker, Some(MarkerState::Off));
        assert_eq!(statuses[1].marker, None);
    }
}
