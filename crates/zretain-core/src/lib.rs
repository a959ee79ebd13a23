//! zretain core - retention and replication consistency engine
//!
//! This crate holds everything that decides what happens to snapshots,
//! independent of how ZFS, ssh or libvirt are reached:
//! - Error and logging facilities shared by every crate
//! - Pool configuration model and snapshot identity
//! - Collaborator traits for storage, transport and virtualization
//! - Snapshot timeline, retention engine, replication synchronizer
//! - The safe-destroy gate, the only path to a destroy
//! - Run report types
//! - In-memory collaborators for tests (`testing` feature)

pub mod cancel;
pub mod driver;
pub mod errors;
pub mod gate;
pub mod logging_facility;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod model;
pub mod replication;
pub mod report;
pub mod retention;
pub mod timeline;

// Macros expand to `$crate::schema::*`
pub use zretain_core_types::schema;

// Re-export commonly used types
pub use cancel::CancellationFlag;
pub use driver::{ReplicationTransport, StorageDriver, VirtualizationConnector, VirtualizationQuery};
pub use errors::{ErrorClass, ExError, ExErrorKind, Result, ZrError};
pub use gate::{filter_safe_to_destroy, GateDecision, SafeDestroyGate, SkipReason};
pub use model::{
    DatasetKind, DatasetSpec, MarkerState, PoolConfig, ReplicationTarget, RetentionPolicy,
    Settings, Snapshot, SnapshotName,
};
pub use replication::{plan_sends, ReplicationResult, ReplicationState, SendStep, Synchronizer};
pub use report::{DatasetOutcome, DatasetReport, RunReport, Stage};
pub use retention::compute_destroy_candidates;
pub use timeline::{RemoteView, Timeline};
