//! Run lock
//!
//! Serializes runs against one host with an exclusive advisory lock. A
//! second run fails immediately instead of waiting.

use crate::errors::{io_error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use zretain_core::errors::{ExError, ExErrorKind};

/// Held for the lifetime of a run; released on drop
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock at `path`, creating the file if needed
    ///
    /// # Errors
    ///
    /// `ExErrorKind::LockHeld` when another run holds the lock.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| io_error("create_lock_dir", e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| io_error("open_lock_file", e))?;

        file.try_lock_exclusive().map_err(|_| {
            ExError::new(ExErrorKind::LockHeld)
                .with_op("acquire_run_lock")
                .with_message(format!(
                    "another zretain run holds the lock at {}",
                    path.display()
                ))
        })?;

        // Informational only; the lock itself is the flock
        file.set_len(0).map_err(|e| io_error("write_lock_file", e))?;
        writeln!(file, "{}", std::process::id()).map_err(|e| io_error("write_lock_file", e))?;

        debug!(path = %path.display(), "Acquired run lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
