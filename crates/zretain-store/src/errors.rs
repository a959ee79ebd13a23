//! Error handling for zretain-store
//!
//! Wraps zretain-core ExError with helpers for each failure site

use std::time::Duration;
use zretain_core::errors::{ErrorClass, ExError, ExErrorKind};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Create a configuration validation error
pub fn config_error(reason: &str) -> ExError {
    ExError::new(ExErrorKind::InvalidConfig)
        .with_op("parse_config")
        .with_message(reason.to_string())
}

/// Create a storage driver error from a failed `zfs` invocation
///
/// Well-known stderr messages are mapped onto their own kinds so callers
/// can tell a missing dataset or a cloned snapshot from other failures.
pub fn driver_error(op: &str, target: &str, stderr: &str) -> ExError {
    let kind = if stderr.contains("dataset does not exist") {
        ExErrorKind::DatasetNotFound
    } else if stderr.contains("has dependent clones") {
        ExErrorKind::HasClones
    } else {
        ExErrorKind::Driver
    };
    ExError::new(kind)
        .with_op(op.to_string())
        .with_message(format!("{}: {}", target, stderr.trim()))
}

/// Create a replication transport error
pub fn transport_error(op: &str, target: &str, detail: &str) -> ExError {
    ExError::new(ExErrorKind::Transport)
        .with_class(ErrorClass::Transport)
        .with_op(op.to_string())
        .with_message(format!("{}: {}", target, detail.trim()))
}

/// Create a timeout error for a command that was killed
pub fn timeout_error(op: &str, program: &str, timeout: Duration) -> ExError {
    ExError::new(ExErrorKind::Timeout)
        .with_op(op.to_string())
        .with_message(format!(
            "{} did not finish within {}s and was killed",
            program,
            timeout.as_secs()
        ))
}

/// Create an IO error
pub fn io_error(operation: &str, err: std::io::Error) -> ExError {
    ExError::new(ExErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}
