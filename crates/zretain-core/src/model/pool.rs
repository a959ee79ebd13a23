//! Validated, in-memory pool configuration
//!
//! Built by the configuration parser in `zretain-store`; everything here is
//! assumed to have passed validation already.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum number of managed snapshots to keep per dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetentionPolicy {
    pub max_snapshots: u32,
}

impl RetentionPolicy {
    pub fn new(max_snapshots: u32) -> Self {
        Self { max_snapshots }
    }

    pub fn limit(&self) -> usize {
        self.max_snapshots as usize
    }
}

/// Whether a dataset backs a virtual machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetKind {
    Regular,
    VmBound { domain: String },
}

/// One dataset under management
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub path: String,
    pub kind: DatasetKind,
    /// Overrides the pool default when set
    pub retention: Option<RetentionPolicy>,
    /// Opt-out from pool replication
    pub replicate: bool,
}

impl DatasetSpec {
    pub fn regular(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: DatasetKind::Regular,
            retention: None,
            replicate: true,
        }
    }

    pub fn vm_bound(path: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: DatasetKind::VmBound {
                domain: domain.into(),
            },
            retention: None,
            replicate: true,
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn without_replication(mut self) -> Self {
        self.replicate = false;
        self
    }

    /// Domain name for VM-bound datasets
    pub fn domain(&self) -> Option<&str> {
        match &self.kind {
            DatasetKind::VmBound { domain } => Some(domain),
            DatasetKind::Regular => None,
        }
    }
}

/// Remote pool that receives replicated snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationTarget {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub destination_pool: String,
    /// Remote-side retention; no remote pruning when unset
    pub secondary_retention: Option<RetentionPolicy>,
}

impl ReplicationTarget {
    pub fn new(host: impl Into<String>, destination_pool: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            destination_pool: destination_pool.into(),
            secondary_retention: None,
        }
    }

    /// Map a local dataset path onto the destination pool
    ///
    /// `tank/vms/win10` on pool `tank` becomes `backup/vms/win10` when the
    /// destination pool is `backup`.
    pub fn remote_dataset_for(&self, local_pool: &str, local_dataset: &str) -> String {
        match local_dataset.strip_prefix(local_pool) {
            Some("") => self.destination_pool.clone(),
            Some(rest) if rest.starts_with('/') => format!("{}{}", self.destination_pool, rest),
            _ => format!("{}/{}", self.destination_pool, local_dataset),
        }
    }

    /// `user@host` or `host` for the ssh command line
    pub fn ssh_destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

/// Run-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Worker pool size for dataset pipelines
    pub workers: usize,
    /// Timeout for metadata calls (list, create, destroy, get)
    pub command_timeout: Duration,
    /// Timeout for one send/receive pipeline
    pub send_timeout: Duration,
    pub lock_path: PathBuf,
    pub libvirt_uri: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 4,
            command_timeout: Duration::from_secs(300),
            send_timeout: Duration::from_secs(6 * 60 * 60),
            lock_path: PathBuf::from("/run/zretain.lock"),
            libvirt_uri: "qemu:///system".to_string(),
        }
    }
}

/// Configuration for the one pool a run operates on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub name: String,
    pub retention: RetentionPolicy,
    pub datasets: Vec<DatasetSpec>,
    pub replication: Option<ReplicationTarget>,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>, retention: RetentionPolicy) -> Self {
        Self {
            name: name.into(),
            retention,
            datasets: Vec::new(),
            replication: None,
        }
    }

    pub fn with_dataset(mut self, dataset: DatasetSpec) -> Self {
        self.datasets.push(dataset);
        self
    }

    pub fn with_replication(mut self, target: ReplicationTarget) -> Self {
        self.replication = Some(target);
        self
    }

    /// Dataset override, else the pool default
    pub fn effective_retention(&self, dataset: &DatasetSpec) -> RetentionPolicy {
        dataset.retention.unwrap_or(self.retention)
    }

    /// Replication target if this dataset replicates
    pub fn replication_for(&self, dataset: &DatasetSpec) -> Option<&ReplicationTarget> {
        self.replication.as_ref().filter(|_| dataset.replicate)
    }

    pub fn regular_datasets(&self) -> impl Iterator<Item = &DatasetSpec> {
        self.datasets
            .iter()
            .filter(|d| matches!(d.kind, DatasetKind::Regular))
    }

    pub fn vm_datasets(&self) -> impl Iterator<Item = &DatasetSpec> {
        self.datasets
            .iter()
            .filter(|d| matches!(d.kind, DatasetKind::VmBound { .. }))
    }

    pub fn has_vm_datasets(&self) -> bool {
        self.vm_datasets().next().is_some()
    }
}
