//! Error taxonomy shared by the validator, the store adapters and the binary

use thiserror::Error;

/// Classification tag attached to every per-event check failure.
///
/// The retry policy only looks at [`ErrorKind::Transient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty identifier or entity type, rejected before any store call
    InvalidInput,
    /// Timeout / deadline class failure, worth retrying
    Transient,
    /// Any other store-reported failure
    Permanent,
    /// Requirement or collection-identifier lookup miss during escalation
    MappingMiss,
    /// Attempt limit reached with only transient failures
    Exhausted,
}

/// Terminal failure of one existence check against one store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("timed out: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("no {table} mapping for {key}")]
    MappingMiss { table: &'static str, key: String },

    #[error("failed after {attempts} attempts, last error: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<CheckError>,
    },
}

impl CheckError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckError::InvalidInput(_) => ErrorKind::InvalidInput,
            CheckError::Transient(_) => ErrorKind::Transient,
            CheckError::Permanent(_) => ErrorKind::Permanent,
            CheckError::MappingMiss { .. } => ErrorKind::MappingMiss,
            CheckError::Exhausted { .. } => ErrorKind::Exhausted,
        }
    }

    /// Whether another attempt with a larger deadline may succeed
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Setup and I/O failures outside the per-event path.
///
/// These are the only errors allowed to abort a whole run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("database error: {0}")]
    Database(String),

    #[error("mapping file error: {0}")]
    Mapping(String),

    #[error("report error: {0}")]
    Report(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
