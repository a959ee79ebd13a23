//! Virtualization query backed by `virsh` over a read-only connection

use crate::errors::{driver_error, io_error, timeout_error, Result};
use crate::exec::{self, ExecFailure};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use zretain_core::driver::{VirtualizationConnector, VirtualizationQuery};

/// Opens read-only `virsh -r -c <uri>` sessions
#[derive(Debug, Clone)]
pub struct VirshConnector {
    binary: PathBuf,
    uri: String,
    timeout: Duration,
}

impl VirshConnector {
    pub fn new(uri: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("virsh"),
            uri: uri.into(),
            timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn virsh(&self, op: &str, args: &[&str]) -> Result<Vec<String>> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-r").arg("-c").arg(&self.uri).args(args);

        let out = exec::run(cmd, self.timeout).map_err(|e| match e {
            ExecFailure::TimedOut { program } => timeout_error(op, &program, self.timeout),
            ExecFailure::Spawn { source, .. } | ExecFailure::Wait { source, .. } => {
                io_error(op, source)
            }
        })?;
        if !out.success {
            return Err(driver_error(op, &self.uri, &out.stderr));
        }
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl VirtualizationConnector for VirshConnector {
    fn open_read_only(&self) -> Result<Box<dyn VirtualizationQuery>> {
        // Fails early when the hypervisor is unreachable
        self.virsh("open_read_only", &["uri"])?;
        Ok(Box::new(VirshSession {
            connector: self.clone(),
        }))
    }
}

/// One read-only hypervisor session
#[derive(Debug)]
pub struct VirshSession {
    connector: VirshConnector,
}

impl VirtualizationQuery for VirshSession {
    fn list_all_domains(&self) -> Result<Vec<String>> {
        self.connector
            .virsh("list_all_domains", &["list", "--all", "--name"])
    }

    fn list_active_domains(&self) -> Result<Vec<String>> {
        self.connector
            .virsh("list_active_domains", &["list", "--state-running", "--name"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zretain_core::errors::ExErrorKind;

    #[test]
    fn test_unreachable_binary_fails_open() {
        let connector = VirshConnector::new("qemu:///system", Duration::from_secs(1))
            .with_binary("/nonexistent/virsh");
        let err = connector.open_read_only().err().map(|e| e.kind());
        assert_eq!(err, Some(ExErrorKind::Io));
    }
}
