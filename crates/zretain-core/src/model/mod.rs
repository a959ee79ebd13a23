pub mod marker;
pub mod pool;
pub mod snapshot;

pub use marker::MarkerState;
pub use pool::{DatasetKind, DatasetSpec, PoolConfig, ReplicationTarget, RetentionPolicy, Settings};
pub use snapshot::{split_snapshot_ref, Snapshot, SnapshotName};
