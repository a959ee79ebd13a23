//! In-memory collaborators
//!
//! HashMap-backed stand-ins for the storage driver, the replication
//! transport and the virtualization query. They enforce the same
//! preconditions as the real systems (clones block destroys, incremental
//! streams need the matching base on the destination) and accept injected
//! failures keyed by operation name and target.

use crate::cancel::CancellationFlag;
use crate::driver::{ReplicationTransport, StorageDriver, VirtualizationConnector, VirtualizationQuery};
use crate::errors::{ErrorClass, ExError, ExErrorKind, Result};
use crate::model::{split_snapshot_ref, Snapshot, SnapshotName};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| ExError::new(ExErrorKind::Internal).with_message("memory collaborator poisoned"))
}

/// Failures to inject, keyed by `(op, target)`
///
/// `target` is a dataset path for dataset-level calls and `dataset@name`
/// for snapshot-level calls.
#[derive(Debug, Default)]
struct Failures(HashMap<(String, String), ExErrorKind>);

impl Failures {
    fn check(&self, op: &str, target: &str) -> Result<()> {
        match self.0.get(&(op.to_string(), target.to_string())) {
            Some(kind) => Err(ExError::new(*kind)
                .with_op(op)
                .with_message(format!("injected failure for {}", target))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct StorageState {
    /// Raw snapshot names per dataset, creation order
    datasets: BTreeMap<String, Vec<String>>,
    /// `dataset@name` refs that have dependent clones
    cloned: BTreeSet<String>,
    mountpoints: BTreeMap<String, PathBuf>,
    created: Vec<String>,
    destroyed: Vec<String>,
    failures: Failures,
}

/// Local pool held in memory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<StorageState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dataset holding managed snapshots with the given timestamps
    pub fn with_dataset(self, dataset: &str, names: &[u64]) -> Self {
        let raw: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        self.add_raw(dataset, raw);
        self
    }

    /// Add a dataset with arbitrary snapshot names (for unmanaged snapshots)
    pub fn with_raw_dataset(self, dataset: &str, names: &[&str]) -> Self {
        self.add_raw(dataset, names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_mountpoint(self, dataset: &str, path: impl Into<PathBuf>) -> Self {
        if let Ok(mut st) = lock(&self.state) {
            st.mountpoints.insert(dataset.to_string(), path.into());
        }
        self
    }

    /// Mark `dataset@name` as having a dependent clone
    pub fn with_clone_of(self, snapshot_ref: &str) -> Self {
        if let Ok(mut st) = lock(&self.state) {
            st.cloned.insert(snapshot_ref.to_string());
        }
        self
    }

    /// Make `op` on `target` fail with `kind`
    pub fn with_failure(self, op: &str, target: &str, kind: ExErrorKind) -> Self {
        if let Ok(mut st) = lock(&self.state) {
            st.failures.0.insert((op.to_string(), target.to_string()), kind);
        }
        self
    }

    fn add_raw(&self, dataset: &str, raw: Vec<String>) {
        if let Ok(mut st) = lock(&self.state) {
            st.datasets.insert(dataset.to_string(), raw);
        }
    }

    /// Current raw snapshot names of `dataset`
    pub fn snapshots(&self, dataset: &str) -> Vec<String> {
        lock(&self.state)
            .ok()
            .and_then(|st| st.datasets.get(dataset).cloned())
            .unwrap_or_default()
    }

    /// Managed snapshot timestamps of `dataset`, oldest first
    pub fn managed(&self, dataset: &str) -> Vec<u64> {
        let mut names: Vec<u64> = self
            .snapshots(dataset)
            .iter()
            .filter_map(|n| SnapshotName::parse_managed(n))
            .map(|n| n.unix_seconds())
            .collect();
        names.sort_unstable();
        names
    }

    /// Every `dataset@name` created through the driver, in call order
    pub fn created(&self) -> Vec<String> {
        lock(&self.state).map(|st| st.created.clone()).unwrap_or_default()
    }

    /// Every `dataset@name` destroyed through the driver, in call order
    pub fn destroyed(&self) -> Vec<String> {
        lock(&self.state).map(|st| st.destroyed.clone()).unwrap_or_default()
    }
}

fn not_found(dataset: &str) -> ExError {
    ExError::new(ExErrorKind::DatasetNotFound)
        .with_dataset(dataset)
        .with_message(format!("dataset does not exist: {}", dataset))
}

impl StorageDriver for MemoryStorage {
    fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>> {
        let st = lock(&self.state)?;
        st.failures.check("list_snapshots", dataset)?;
        st.datasets
            .get(dataset)
            .cloned()
            .ok_or_else(|| not_found(dataset).with_op("list_snapshots"))
    }

    fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut st = lock(&self.state)?;
        let target = snapshot.to_string();
        st.failures.check("create_snapshot", &target)?;
        st.failures.check("create_snapshot", &snapshot.dataset)?;
        let name = snapshot.name.to_string();
        let snaps = st
            .datasets
            .get_mut(&snapshot.dataset)
            .ok_or_else(|| not_found(&snapshot.dataset).with_op("create_snapshot"))?;
        if snaps.contains(&name) {
            return Err(ExError::new(ExErrorKind::Driver)
                .with_op("create_snapshot")
                .with_snapshot(target)
                .with_message("dataset already exists"));
        }
        snaps.push(name);
        st.created.push(target);
        Ok(())
    }

    fn destroy_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut st = lock(&self.state)?;
        let target = snapshot.to_string();
        st.failures.check("destroy_snapshot", &target)?;
        if st.cloned.contains(&target) {
            return Err(ExError::new(ExErrorKind::HasClones)
                .with_op("destroy_snapshot")
                .with_snapshot(target)
                .with_message("snapshot has dependent clones"));
        }
        let name = snapshot.name.to_string();
        let snaps = st
            .datasets
            .get_mut(&snapshot.dataset)
            .ok_or_else(|| not_found(&snapshot.dataset).with_op("destroy_snapshot"))?;
        let before = snaps.len();
        snaps.retain(|n| *n != name);
        if snaps.len() == before {
            return Err(ExError::new(ExErrorKind::Driver)
                .with_op("destroy_snapshot")
                .with_snapshot(target)
                .with_message("could not find any snapshots to destroy"));
        }
        st.destroyed.push(target);
        Ok(())
    }

    fn has_clones(&self, snapshot: &Snapshot) -> Result<bool> {
        let st = lock(&self.state)?;
        let target = snapshot.to_string();
        st.failures.check("has_clones", &target)?;
        Ok(st.cloned.contains(&target))
    }

    fn get_mountpoint(&self, dataset: &str) -> Result<PathBuf> {
        let st = lock(&self.state)?;
        st.failures.check("get_mountpoint", dataset)?;
        st.mountpoints.get(dataset).cloned().ok_or_else(|| {
            ExError::new(ExErrorKind::Driver)
                .with_op("get_mountpoint")
                .with_dataset(dataset)
                .with_message("dataset is not mounted")
        })
    }

    fn clone_snapshot(&self, source: &str, target: &str) -> Result<()> {
        let (dataset, name) = split_snapshot_ref(source)?;
        let mut st = lock(&self.state)?;
        st.failures.check("clone_snapshot", source)?;
        let exists = st
            .datasets
            .get(dataset)
            .map_or(false, |snaps| snaps.iter().any(|n| n == name));
        if !exists {
            return Err(ExError::new(ExErrorKind::Driver)
                .with_op("clone_snapshot")
                .with_snapshot(source)
                .with_message("snapshot does not exist"));
        }
        if st.datasets.contains_key(target) {
            return Err(ExError::new(ExErrorKind::Driver)
                .with_op("clone_snapshot")
                .with_dataset(target)
                .with_message("dataset already exists"));
        }
        st.datasets.insert(target.to_string(), Vec::new());
        st.cloned.insert(source.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TransportState {
    remote: BTreeMap<String, Vec<String>>,
    /// `full:<dest>@<to>` or `incr:<dest>@<from>..<to>`, in call order
    sends: Vec<String>,
    remote_destroyed: Vec<String>,
    failures: Failures,
}

/// Remote pool held in memory
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<TransportState>,
    cancel_after_send: Option<CancellationFlag>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(self, remote_dataset: &str, names: &[u64]) -> Self {
        if let Ok(mut st) = lock(&self.state) {
            st.remote.insert(
                remote_dataset.to_string(),
                names.iter().map(|n| n.to_string()).collect(),
            );
        }
        self
    }

    /// Make `op` on `target` fail with `kind`
    ///
    /// Sends are keyed by the local `dataset@name` being sent.
    pub fn with_failure(self, op: &str, target: &str, kind: ExErrorKind) -> Self {
        if let Ok(mut st) = lock(&self.state) {
            st.failures.0.insert((op.to_string(), target.to_string()), kind);
        }
        self
    }

    /// Add a remote dataset with arbitrary snapshot names, possibly none
    pub fn with_raw_remote(self, remote_dataset: &str, names: &[&str]) -> Self {
        if let Ok(mut st) = lock(&self.state) {
            st.remote.insert(
                remote_dataset.to_string(),
                names.iter().map(|s| s.to_string()).collect(),
            );
        }
        self
    }

    /// Raise `flag` after the first acknowledged send
    pub fn cancel_after_first_send(mut self, flag: CancellationFlag) -> Self {
        self.cancel_after_send = Some(flag);
        self
    }

    pub fn remote_snapshots(&self, remote_dataset: &str) -> Vec<u64> {
        lock(&self.state)
            .ok()
            .and_then(|st| st.remote.get(remote_dataset).cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(|n| n.parse().ok())
            .collect()
    }

    pub fn sends(&self) -> Vec<String> {
        lock(&self.state).map(|st| st.sends.clone()).unwrap_or_default()
    }

    pub fn remote_destroyed(&self) -> Vec<String> {
        lock(&self.state)
            .map(|st| st.remote_destroyed.clone())
            .unwrap_or_default()
    }

    fn acknowledged(&self) {
        if let Some(flag) = &self.cancel_after_send {
            flag.cancel();
        }
    }
}

fn transport_err(op: &str, destination: &str, message: &str) -> ExError {
    ExError::new(ExErrorKind::Transport)
        .with_class(ErrorClass::Transport)
        .with_op(op)
        .with_message(format!("{}: {}", destination, message))
}

impl ReplicationTransport for MemoryTransport {
    fn list_remote_snapshots(&self, remote_dataset: &str) -> Result<Option<Vec<String>>> {
        let st = lock(&self.state)?;
        st.failures.check("list_remote_snapshots", remote_dataset)?;
        Ok(st.remote.get(remote_dataset).cloned())
    }

    fn send_full(&self, snapshot: &Snapshot, destination: &str) -> Result<()> {
        {
            let mut st = lock(&self.state)?;
            st.failures.check("send_full", &snapshot.to_string())?;
            if st.remote.contains_key(destination) {
                return Err(transport_err(
                    "send_full",
                    destination,
                    "destination exists and must be overwritten with -F",
                ));
            }
            st.remote
                .insert(destination.to_string(), vec![snapshot.name.to_string()]);
            st.sends.push(format!("full:{}@{}", destination, snapshot.name));
        }
        self.acknowledged();
        Ok(())
    }

    fn send_incremental(&self, from: &Snapshot, to: &Snapshot, destination: &str) -> Result<()> {
        {
            let mut st = lock(&self.state)?;
            st.failures.check("send_incremental", &to.to_string())?;
            let Some(dest) = st.remote.get_mut(destination) else {
                return Err(transport_err(
                    "send_incremental",
                    destination,
                    "destination does not exist",
                ));
            };
            let newest = dest.iter().filter_map(|n| SnapshotName::parse_managed(n)).max();
            if newest != Some(from.name) {
                return Err(transport_err(
                    "send_incremental",
                    destination,
                    "incremental source does not match destination",
                ));
            }
            dest.push(to.name.to_string());
            st.sends
                .push(format!("incr:{}@{}..{}", destination, from.name, to.name));
        }
        self.acknowledged();
        Ok(())
    }

    fn destroy_remote_snapshot(&self, remote_dataset: &str, name: SnapshotName) -> Result<()> {
        let mut st = lock(&self.state)?;
        let target = format!("{}@{}", remote_dataset, name);
        st.failures.check("destroy_remote_snapshot", &target)?;
        let raw = name.to_string();
        match st.remote.get_mut(remote_dataset) {
            Some(snaps) if snaps.contains(&raw) => {
                snaps.retain(|n| *n != raw);
                st.remote_destroyed.push(target);
                Ok(())
            }
            _ => Err(transport_err(
                "destroy_remote_snapshot",
                &target,
                "could not find any snapshots to destroy",
            )),
        }
    }
}

/// Fixed hypervisor domain lists, with open/close accounting
#[derive(Debug, Clone, Default)]
pub struct StaticDomains {
    all: Vec<String>,
    active: Vec<String>,
    fail_open: bool,
    fail_active: bool,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl StaticDomains {
    pub fn new(all: &[&str], active: &[&str]) -> Self {
        Self {
            all: all.iter().map(|s| s.to_string()).collect(),
            active: active.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_active_query(mut self) -> Self {
        self.fail_active = true;
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl VirtualizationConnector for StaticDomains {
    fn open_read_only(&self) -> Result<Box<dyn VirtualizationQuery>> {
        if self.fail_open {
            return Err(ExError::new(ExErrorKind::Driver)
                .with_op("open_read_only")
                .with_message("failed to connect to the hypervisor"));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.clone()))
    }
}

impl VirtualizationQuery for StaticDomains {
    fn list_all_domains(&self) -> Result<Vec<String>> {
        Ok(self.all.clone())
    }

    fn list_active_domains(&self) -> Result<Vec<String>> {
        if self.fail_active {
            return Err(ExError::new(ExErrorKind::Driver)
                .with_op("list_active_domains")
                .with_message("hypervisor query failed"));
        }
        Ok(self.active.clone())
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
