//! Error types for the scheduler

use thiserror::Error;
use uuid::Uuid;

use scanflow_core::CoreError;
use scanflow_core::domain::message::MessageId;
use scanflow_delegate::DelegateError;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// Malformed input, never retried
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The user is not a member of the job's project
    #[error("User {user} has no access to job {job_uuid}")]
    NotAuthorized { user: String, job_uuid: Uuid },

    #[error("Job {job_uuid} was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict { job_uuid: Uuid, expected: u64, found: u64 },

    /// A synchronous request was sent to a topic without handler
    #[error("No synchronous handler registered for {0}")]
    NoSyncHandler(MessageId),

    /// Infrastructure failure that may disappear on retry
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The delegate server rejected a call
    #[error("Delegate call failed: {0}")]
    Delegate(String),
}

impl SchedulerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::VersionConflict { .. })
    }
}

impl From<CoreError> for SchedulerError {
    fn from(err: CoreError) -> Self {
        SchedulerError::Validation(err.to_string())
    }
}

impl From<DelegateError> for SchedulerError {
    fn from(err: DelegateError) -> Self {
        match err {
            DelegateError::Io(_) | DelegateError::VersionConflict { .. } => {
                SchedulerError::Transient(err.to_string())
            }
            e if e.is_not_found() => SchedulerError::NotFound(e.to_string()),
            e => SchedulerError::Delegate(e.to_string()),
        }
    }
}
