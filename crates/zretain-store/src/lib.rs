//! zretain store - configuration and system integrations
//!
//! Provides:
//! - YAML configuration format, parser and validation
//! - Command execution with deadlines
//! - `zfs` storage driver, `ssh` replication transport, `virsh` query
//! - VM state markers and the run lock

pub mod config;
pub mod errors;
pub mod exec;
pub mod lock;
pub mod marker;
pub mod ssh;
pub mod virsh;
pub mod zfs;

// Re-export key types
pub use errors::Result;
pub use lock::RunLock;
pub use ssh::SshTransport;
pub use virsh::VirshConnector;
pub use zfs::ZfsCli;
