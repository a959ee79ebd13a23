use thiserror::Error;
use zretain_core_types::RunId;

/// Result type alias using the canonical structured error
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code usable for programmatic handling,
/// tests and the run report, and to one of the error classes that decide how
/// far a failure propagates (see [`ErrorClass`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExErrorKind {
    // Configuration
    InvalidConfig,
    UnknownPool,
    UnknownDomain,
    DuplicateDataset,

    // Storage driver
    Driver,
    DatasetNotFound,
    HasClones,
    InvalidSnapshotName,

    // Replication transport
    Transport,
    NoCommonSnapshot,

    // Safety
    SafetyViolation,

    // Integration/IO
    Io,
    Serialization,
    Timeout,
    LockHeld,
    Cancelled,

    // Internal
    Internal,
}

/// How far an error of a given kind is allowed to propagate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Invalid configuration; aborts before any mutating action
    Config,
    /// Storage operation failed; scoped to one dataset
    Driver,
    /// Replication send or list failed; halts sends for one dataset
    Transport,
    /// Internal invariant check failed; fatal for the destroy call and the run
    Safety,
    /// Everything else (locks, cancellation, bugs)
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Config => "config",
            ErrorClass::Driver => "driver",
            ErrorClass::Transport => "transport",
            ErrorClass::Safety => "safety",
            ErrorClass::Internal => "internal",
        }
    }
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidConfig => "ERR_INVALID_CONFIG",
            ExErrorKind::UnknownPool => "ERR_UNKNOWN_POOL",
            ExErrorKind::UnknownDomain => "ERR_UNKNOWN_DOMAIN",
            ExErrorKind::DuplicateDataset => "ERR_DUPLICATE_DATASET",
            ExErrorKind::Driver => "ERR_DRIVER",
            ExErrorKind::DatasetNotFound => "ERR_DATASET_NOT_FOUND",
            ExErrorKind::HasClones => "ERR_HAS_CLONES",
            ExErrorKind::InvalidSnapshotName => "ERR_INVALID_SNAPSHOT_NAME",
            ExErrorKind::Transport => "ERR_TRANSPORT",
            ExErrorKind::NoCommonSnapshot => "ERR_NO_COMMON_SNAPSHOT",
            ExErrorKind::SafetyViolation => "ERR_SAFETY_VIOLATION",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Timeout => "ERR_TIMEOUT",
            ExErrorKind::LockHeld => "ERR_LOCK_HELD",
            ExErrorKind::Cancelled => "ERR_CANCELLED",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Default class for this kind.
    ///
    /// `Timeout` and `Io` are reported as driver failures unless the error
    /// was built by a transport call site, which records the class
    /// explicitly via [`ExError::with_class`].
    pub fn class(&self) -> ErrorClass {
        match self {
            ExErrorKind::InvalidConfig
            | ExErrorKind::UnknownPool
            | ExErrorKind::UnknownDomain
            | ExErrorKind::DuplicateDataset
            | ExErrorKind::Serialization => ErrorClass::Config,
            ExErrorKind::Driver
            | ExErrorKind::DatasetNotFound
            | ExErrorKind::HasClones
            | ExErrorKind::InvalidSnapshotName
            | ExErrorKind::Io
            | ExErrorKind::Timeout => ErrorClass::Driver,
            ExErrorKind::Transport | ExErrorKind::NoCommonSnapshot => ErrorClass::Transport,
            ExErrorKind::SafetyViolation => ErrorClass::Safety,
            ExErrorKind::LockHeld | ExErrorKind::Cancelled | ExErrorKind::Internal => {
                ErrorClass::Internal
            }
        }
    }
}

/// Canonical structured error type
///
/// Carries classification fields for programmatic handling and enough
/// context (operation, dataset, snapshot) to diagnose a failure from the run
/// report alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ExError {
    kind: ExErrorKind,
    class: ErrorClass,
    op: Option<String>,
    dataset: Option<String>,
    snapshot: Option<String>,
    run_id: Option<RunId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            class: kind.class(),
            op: None,
            dataset: None,
            snapshot: None,
            run_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Override the class derived from the kind
    pub fn with_class(mut self, class: ErrorClass) -> Self {
        self.class = class;
        self
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add dataset context
    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    /// Add snapshot context (`dataset@name` or bare name)
    pub fn with_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.snapshot = Some(snapshot.into());
        self
    }

    /// Add run id context
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn dataset(&self) -> Option<&str> {
        self.dataset.as_deref()
    }

    pub fn snapshot(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }

    /// Whether this error must abort the whole run rather than one dataset
    pub fn is_fatal(&self) -> bool {
        matches!(self.class, ErrorClass::Config | ErrorClass::Safety)
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(dataset) = &self.dataset {
            write!(f, " (dataset: {})", dataset)?;
        }
        if let Some(snapshot) = &self.snapshot {
            write!(f, " (snapshot: {})", snapshot)?;
        }
        if let Some(source) = &self.source {
            write!(f, " caused by {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Failures raised by the consistency engine itself
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ZrError {
    /// A destroy was attempted on a snapshot the gate must protect
    #[error("Refusing to destroy {dataset}@{snapshot}: {reason}")]
    SafetyViolation {
        dataset: String,
        snapshot: String,
        reason: String,
    },

    /// Snapshot name is not a unix timestamp
    #[error("Invalid snapshot name '{name}': expected a unix timestamp")]
    InvalidSnapshotName { name: String },

    /// Snapshot reference is not of the form dataset@name
    #[error("Invalid snapshot reference '{reference}': expected <dataset>@<name>")]
    InvalidSnapshotRef { reference: String },

    /// Remote dataset exists but shares no managed snapshot with the local timeline
    #[error("Remote dataset {remote} shares no snapshot with {dataset}")]
    NoCommonSnapshot { dataset: String, remote: String },

    /// Requested pool is not present in the configuration
    #[error("Requested pool `{pool}` is not defined")]
    UnknownPool { pool: String },

    /// VM-bound dataset names a domain the hypervisor does not know
    #[error("Unknown domain `{domain}` for dataset {dataset}")]
    UnknownDomain { dataset: String, domain: String },

    /// Run was cancelled before the operation was issued
    #[error("Run cancelled before {op} on {dataset}")]
    Cancelled { op: String, dataset: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<ZrError> for ExError {
    fn from(err: ZrError) -> Self {
        match err {
            ZrError::SafetyViolation {
                dataset,
                snapshot,
                reason,
            } => ExError::new(ExErrorKind::SafetyViolation)
                .with_op("destroy_snapshot")
                .with_dataset(dataset)
                .with_snapshot(snapshot)
                .with_message(reason),

            ZrError::InvalidSnapshotName { name } => {
                ExError::new(ExErrorKind::InvalidSnapshotName)
                    .with_snapshot(name)
                    .with_message("Snapshot name is not a unix timestamp")
            }

            ZrError::InvalidSnapshotRef { reference } => {
                ExError::new(ExErrorKind::InvalidSnapshotName)
                    .with_snapshot(reference)
                    .with_message("Expected <dataset>@<name>")
            }

            ZrError::NoCommonSnapshot { dataset, remote } => {
                ExError::new(ExErrorKind::NoCommonSnapshot)
                    .with_op("synchronize")
                    .with_dataset(dataset)
                    .with_message(format!(
                        "Remote dataset {} exists but shares no snapshot with the local dataset",
                        remote
                    ))
            }

            ZrError::UnknownPool { pool } => ExError::new(ExErrorKind::UnknownPool)
                .with_op("select_pool")
                .with_message(format!("Requested pool `{}` is not defined", pool)),

            ZrError::UnknownDomain { dataset, domain } => {
                ExError::new(ExErrorKind::UnknownDomain)
                    .with_op("validate_domains")
                    .with_dataset(dataset)
                    .with_message(format!("Invalid domain: {}", domain))
            }

            ZrError::Cancelled { op, dataset } => ExError::new(ExErrorKind::Cancelled)
                .with_op(op)
                .with_dataset(dataset)
                .with_message("Run cancelled"),

            ZrError::Internal { message } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}

/// Conversion from serde_json::Error (report encoding)
impl From<serde_json::Error> for ExError {
    fn from(err: serde_json::Error) -> Self {
        ExError::new(ExErrorKind::Serialization).with_message(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_codes() {
        let cases = [
            (ExErrorKind::InvalidConfig, "ERR_INVALID_CONFIG"),
            (ExErrorKind::UnknownDomain, "ERR_UNKNOWN_DOMAIN"),
            (ExErrorKind::Driver, "ERR_DRIVER"),
            (ExErrorKind::Transport, "ERR_TRANSPORT"),
            (ExErrorKind::SafetyViolation, "ERR_SAFETY_VIOLATION"),
            (ExErrorKind::Timeout, "ERR_TIMEOUT"),
        ];
        for (kind, expected_code) in cases {
            assert_eq!(kind.code(), expected_code, "Wrong code for {:?}", kind);
        }
    }

    #[test]
    fn test_class_mapping_follows_taxonomy() {
        assert_eq!(ExErrorKind::UnknownDomain.class(), ErrorClass::Config);
        assert_eq!(ExErrorKind::DatasetNotFound.class(), ErrorClass::Driver);
        assert_eq!(ExErrorKind::NoCommonSnapshot.class(), ErrorClass::Transport);
        assert_eq!(ExErrorKind::SafetyViolation.class(), ErrorClass::Safety);
    }

    #[test]
    fn test_transport_timeout_keeps_transport_class() {
        let err = ExError::new(ExErrorKind::Timeout).with_class(ErrorClass::Transport);
        assert_eq!(err.kind(), ExErrorKind::Timeout);
        assert_eq!(err.class(), ErrorClass::Transport);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_safety_violation_is_fatal() {
        let err: ExError = ZrError::SafetyViolation {
            dataset: "tank/a".into(),
            snapshot: "1700000002".into(),
            reason: "snapshot is the high-water mark".into(),
        }
        .into();
        assert!(err.is_fatal());
        assert_eq!(err.dataset(), Some("tank/a"));
        assert_eq!(err.snapshot(), Some("1700000002"));
    }

    #[test]
    fn test_display_includes_context() {
        let err = ExError::new(ExErrorKind::Driver)
            .with_op("list_snapshots")
            .with_dataset("tank/home")
            .with_message("exit status 1");
        let text = err.to_string();
        assert!(text.starts_with("[ERR_DRIVER]"));
        assert!(text.contains("list_snapshots"));
        assert!(text.contains("tank/home"));
    }
}
