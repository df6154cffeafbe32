use std::fmt::Display;
use thiserror::Error;

/// Errors raised by metadata store backends
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record, tag or object matched the lookup
    #[error("not found: {0}")]
    NotFound(String),

    /// Input rejected before touching the backend
    #[error("invalid input: {0}")]
    Validation(String),

    /// Write rejected by a storage-level constraint
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Stored or supplied vector has the wrong length
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Backend failure with the operation and target that triggered it
    #[error("{operation} failed for {target}: {message}")]
    Backend {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn backend(operation: &'static str, target: impl Into<String>, err: impl Display) -> Self {
        StoreError::Backend {
            operation,
            target: target.into(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Attach operation context to transport-level failures. Errors that
    /// already carry meaning for the caller pass through untouched.
    pub(crate) fn in_operation(self, operation: &'static str, target: &str) -> Self {
        match self {
            StoreError::Sqlite(err) => StoreError::backend(operation, target, err),
            StoreError::Http(err) => StoreError::backend(operation, target, err),
            StoreError::Io(err) => StoreError::backend(operation, target, err),
            StoreError::Serialization(err) => StoreError::backend(operation, target, err),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
