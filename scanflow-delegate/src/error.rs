//! Error types for the delegate server

use thiserror::Error;
use uuid::Uuid;

use scanflow_core::domain::delegate::DelegateJobState;

/// Result type alias for delegate operations
pub type Result<T> = std::result::Result<T, DelegateError>;

/// Errors returned by delegate job operations
#[derive(Debug, Clone, Error)]
pub enum DelegateError {
    /// No product setup exists for the product id
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Delegate job not found: {0}")]
    JobNotFound(Uuid),

    /// Operation not allowed in the current state
    #[error("Delegate job {uuid} is in state {state}, {operation} not possible")]
    InvalidState {
        uuid: Uuid,
        state: DelegateJobState,
        operation: &'static str,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Another writer updated the record first
    #[error("Delegate job {uuid} was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict { uuid: Uuid, expected: u64, found: u64 },

    /// Workspace file access failed
    #[error("Workspace access failed: {0}")]
    Io(String),

    /// The product process could not be launched
    #[error("Process launch failed: {0}")]
    Process(String),

    /// The job has not produced a result (yet)
    #[error("No result available for delegate job {0}")]
    ResultNotAvailable(Uuid),
}

impl DelegateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ProductNotFound(_) | Self::JobNotFound(_))
    }

    /// Errors that may disappear when the operation is repeated
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::Io(_))
    }
}

impl From<std::io::Error> for DelegateError {
    fn from(err: std::io::Error) -> Self {
        DelegateError::Io(err.to_string())
    }
}
