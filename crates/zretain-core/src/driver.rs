//! Collaborator interfaces
//!
//! The consistency engine never touches ZFS, ssh or libvirt directly. It
//! talks to these narrow traits, implemented by `zretain-store` for real
//! systems and by the `memory` module (`testing` feature) for tests.
//!
//! All calls are blocking. Implementations are responsible for bounding
//! each call with a timeout and reporting expiry as `ExErrorKind::Timeout`.

use crate::errors::Result;
use crate::model::{Snapshot, SnapshotName};
use std::path::PathBuf;

/// Local storage operations on one pool
pub trait StorageDriver: Send + Sync {
    /// Names of the snapshots of `dataset` (the part after `@`), oldest first
    ///
    /// # Errors
    ///
    /// Fails with a driver-class error when the dataset does not exist or
    /// the query itself fails.
    fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>>;

    /// Create `snapshot`
    fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Destroy `snapshot`, never recursively
    ///
    /// # Errors
    ///
    /// Fails with `ExErrorKind::HasClones` when dependent clones exist.
    fn destroy_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Whether any dataset is cloned from `snapshot`
    fn has_clones(&self, snapshot: &Snapshot) -> Result<bool>;

    /// Mountpoint of a mounted filesystem dataset
    fn get_mountpoint(&self, dataset: &str) -> Result<PathBuf>;

    /// Clone `dataset@name` into a new dataset
    fn clone_snapshot(&self, source: &str, target: &str) -> Result<()>;
}

/// Transfer of snapshot streams to the remote pool
pub trait ReplicationTransport: Send + Sync {
    /// Snapshot names present on `remote_dataset`
    ///
    /// `None` when the remote dataset does not exist yet. An existing
    /// dataset without snapshots is `Some` of an empty list.
    fn list_remote_snapshots(&self, remote_dataset: &str) -> Result<Option<Vec<String>>>;

    /// Send a complete stream of `snapshot` into `destination`
    fn send_full(&self, snapshot: &Snapshot, destination: &str) -> Result<()>;

    /// Send the delta between `from` and `to` into `destination`
    fn send_incremental(&self, from: &Snapshot, to: &Snapshot, destination: &str) -> Result<()>;

    /// Destroy a snapshot on the remote pool (secondary retention)
    fn destroy_remote_snapshot(&self, remote_dataset: &str, name: SnapshotName) -> Result<()>;
}

/// Read-only view of the hypervisor's domains
pub trait VirtualizationQuery: Send + Sync {
    /// Every defined domain, running or not
    fn list_all_domains(&self) -> Result<Vec<String>>;

    /// Domains currently running
    fn list_active_domains(&self) -> Result<Vec<String>>;

    /// Release the connection. Called exactly once by the owning session.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens read-only virtualization connections
pub trait VirtualizationConnector: Send + Sync {
    fn open_read_only(&self) -> Result<Box<dyn VirtualizationQuery>>;
}
