//! Replication transport: `zfs send | ssh host zfs recv`

use crate::errors::{io_error, timeout_error, transport_error, Result};
use crate::exec::{self, CommandOutput, ExecFailure};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};
use zretain_core::driver::ReplicationTransport;
use zretain_core::errors::{ErrorClass, ExError};
use zretain_core::model::{ReplicationTarget, Snapshot, SnapshotName};

/// Sends snapshot streams to a remote pool over ssh
#[derive(Debug, Clone)]
pub struct SshTransport {
    target: ReplicationTarget,
    ssh_binary: PathBuf,
    zfs_binary: PathBuf,
    remote_zfs: String,
    command_timeout: Duration,
    send_timeout: Duration,
}

fn exec_error(op: &str, timeout: Duration, e: ExecFailure) -> ExError {
    let err = match e {
        ExecFailure::TimedOut { program } => timeout_error(op, &program, timeout),
        ExecFailure::Spawn { source, .. } | ExecFailure::Wait { source, .. } => io_error(op, source),
    };
    err.with_class(ErrorClass::Transport)
}

impl SshTransport {
    pub fn new(target: ReplicationTarget, command_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            target,
            ssh_binary: PathBuf::from("ssh"),
            zfs_binary: PathBuf::from("zfs"),
            remote_zfs: "zfs".to_string(),
            command_timeout,
            send_timeout,
        }
    }

    /// Use different local `ssh` and `zfs` executables
    pub fn with_binaries(mut self, ssh: impl Into<PathBuf>, zfs: impl Into<PathBuf>) -> Self {
        self.ssh_binary = ssh.into();
        self.zfs_binary = zfs.into();
        self
    }

    pub fn target(&self) -> &ReplicationTarget {
        &self.target
    }

    /// `ssh [-p port] -o BatchMode=yes [user@]host zfs <args>`
    fn remote_zfs(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.ssh_binary);
        if let Some(port) = self.target.port {
            cmd.arg("-p").arg(port.to_string());
        }
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg(self.target.ssh_destination())
            .arg(&self.remote_zfs)
            .args(args);
        cmd
    }

    fn run_remote(&self, op: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!(op = op, host = self.target.host.as_str(), args = ?args, "Running remote zfs");
        exec::run(self.remote_zfs(args), self.command_timeout)
            .map_err(|e| exec_error(op, self.command_timeout, e))
    }

    fn send(&self, op: &str, send_args: &[&str], destination: &str) -> Result<()> {
        let mut producer = Command::new(&self.zfs_binary);
        producer.arg("send").args(send_args);
        let consumer = self.remote_zfs(&["recv", "-u", destination]);

        let out = exec::run_pipeline(producer, consumer, self.send_timeout)
            .map_err(|e| exec_error(op, self.send_timeout, e))?;
        if !out.success() {
            return Err(transport_error(op, destination, &out.stderr()));
        }
        Ok(())
    }
}

impl ReplicationTransport for SshTransport {
    fn list_remote_snapshots(&self, remote_dataset: &str) -> Result<Option<Vec<String>>> {
        let out = self.run_remote(
            "list_remote_snapshots",
            &["list", "-H", "-t", "snapshot", "-o", "name", "-s", "createtxg", "-d", "1", remote_dataset],
        )?;
        if !out.success {
            if out.stderr.contains("dataset does not exist") {
                return Ok(None);
            }
            return Err(transport_error("list_remote_snapshots", remote_dataset, &out.stderr));
        }
        let prefix = format!("{}@", remote_dataset);
        Ok(Some(
            out.stdout
                .lines()
                .filter_map(|line| line.trim().strip_prefix(prefix.as_str()))
                .map(str::to_string)
                .collect(),
        ))
    }

    fn send_full(&self, snapshot: &Snapshot, destination: &str) -> Result<()> {
        let source = snapshot.to_string();
        self.send("send_full", &[&source], destination)?;
        info!(snapshot = %snapshot, destination = destination, "Full stream received");
        Ok(())
    }

    fn send_incremental(&self, from: &Snapshot, to: &Snapshot, destination: &str) -> Result<()> {
        let base = from.to_string();
        let source = to.to_string();
        self.send("send_incremental", &["-i", &base, &source], destination)?;
        info!(from = %from, snapshot = %to, destination = destination, "Incremental stream received");
        Ok(())
    }

    fn destroy_remote_snapshot(&self, remote_dataset: &str, name: SnapshotName) -> Result<()> {
        let target = format!("{}@{}", remote_dataset, name);
        let out = self.run_remote("destroy_remote_snapshot", &["destroy", &target])?;
        if !out.success {
            return Err(transport_error("destroy_remote_snapshot", &target, &out.stderr));
        }
        Ok(())
    }
}
