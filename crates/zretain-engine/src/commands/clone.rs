//! Clone a snapshot into a new dataset

#![allow(clippy::result_large_err)]

use std::time::Instant;
use zretain_core::driver::StorageDriver;
use zretain_core::errors::{ExError, ExErrorKind, Result};
use zretain_core::model::split_snapshot_ref;

/// Clone `source` (`dataset@snapshot`) into the new dataset `target`
///
/// A cloned snapshot is protected from retention from then on, since the
/// gate skips snapshots with dependent clones.
///
/// # Errors
///
/// - `InvalidSnapshotName` when `source` is not `dataset@snapshot`
/// - `InvalidConfig` when `target` is not a dataset path
/// - driver errors from the clone itself
pub fn clone_snapshot(storage: &dyn StorageDriver, source: &str, target: &str) -> Result<()> {
    let start = Instant::now();
    zretain_core::log_op_start!("clone_snapshot", snapshot = source, target = target);

    let result = validate(source, target).and_then(|()| storage.clone_snapshot(source, target));
    match result {
        Ok(()) => {
            zretain_core::log_op_end!(
                "clone_snapshot",
                duration_ms = start.elapsed().as_millis() as u64,
                snapshot = source,
                target = target
            );
            Ok(())
        }
        Err(err) => {
            let err = err.with_snapshot(source);
            zretain_core::log_op_error!(
                "clone_snapshot",
                err.clone(),
                duration_ms = start.elapsed().as_millis() as u64,
                snapshot = source
            );
            Err(err)
        }
    }
}

fn validate(source: &str, target: &str) -> Result<()> {
    split_snapshot_ref(source)?;
    if target.is_empty() || target.contains('@') || target.starts_with('/') {
        return Err(ExError::new(ExErrorKind::InvalidConfig)
            .with_op("clone_snapshot")
            .with_dataset(target)
            .with_message("clone target must be a dataset path"));
    }
    Ok(())
}
