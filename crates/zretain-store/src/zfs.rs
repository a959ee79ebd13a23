//! Storage driver backed by the `zfs` command line tool

use crate::errors::{driver_error, io_error, timeout_error, Result};
use crate::exec::{self, CommandOutput, ExecFailure};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::debug;
use zretain_core::driver::StorageDriver;
use zretain_core::errors::{ExError, ExErrorKind};
use zretain_core::model::Snapshot;

/// `zfs` invocation settings
#[derive(Debug, Clone)]
pub struct ZfsCli {
    binary: PathBuf,
    timeout: Duration,
}

impl ZfsCli {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("zfs"),
            timeout,
        }
    }

    /// Use a different `zfs` executable
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    /// Run `zfs <args>`; a non-zero exit becomes a driver error
    fn zfs(&self, op: &str, target: &str, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        debug!(op = op, target = target, args = ?args, "Running zfs");

        let out = exec::run(cmd, self.timeout).map_err(|e| match e {
            ExecFailure::TimedOut { program } => timeout_error(op, &program, self.timeout),
            ExecFailure::Spawn { source, .. } | ExecFailure::Wait { source, .. } => {
                io_error(op, source)
            }
        })?;

        if !out.success {
            return Err(driver_error(op, target, &out.stderr));
        }
        Ok(out)
    }
}

/// First line of `zfs get -H -o value` output
fn single_value(out: &CommandOutput) -> &str {
    out.stdout.lines().next().unwrap_or("").trim()
}

impl StorageDriver for ZfsCli {
    fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>> {
        let out = self.zfs(
            "list_snapshots",
            dataset,
            &["list", "-H", "-t", "snapshot", "-o", "name", "-s", "createtxg", "-d", "1", dataset],
        )?;
        let prefix = format!("{}@", dataset);
        Ok(out
            .stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix(prefix.as_str()))
            .map(str::to_string)
            .collect())
    }

    fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let target = snapshot.to_string();
        self.zfs("create_snapshot", &target, &["snapshot", &target])?;
        Ok(())
    }

    fn destroy_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let target = snapshot.to_string();
        // Never -r or -R: only this one snapshot
        self.zfs("destroy_snapshot", &target, &["destroy", &target])?;
        Ok(())
    }

    fn has_clones(&self, snapshot: &Snapshot) -> Result<bool> {
        let target = snapshot.to_string();
        let out = self.zfs("has_clones", &target, &["get", "-H", "-o", "value", "clones", &target])?;
        let value = single_value(&out);
        Ok(!(value.is_empty() || value == "-"))
    }

    fn get_mountpoint(&self, dataset: &str) -> Result<PathBuf> {
        let out = self.zfs(
            "get_mountpoint",
            dataset,
            &["get", "-H", "-o", "value", "mountpoint", dataset],
        )?;
        match single_value(&out) {
            "" | "-" | "none" | "legacy" => Err(ExError::new(ExErrorKind::Driver)
                .with_op("get_mountpoint")
                .with_dataset(dataset)
                .with_message("dataset has no usable mountpoint")),
            path => Ok(PathBuf::from(path)),
        }
    }

    fn clone_snapshot(&self, source: &str, target: &str) -> Result<()> {
        self.zfs("clone_snapshot", source, &["clone", source, target])?;
        Ok(())
    }
}
