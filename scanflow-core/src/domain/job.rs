//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Active job record kept by the scheduler
///
/// Only waiting and running jobs have a record. Reaching a terminal
/// status deletes the record instead of storing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_uuid: Uuid,
    pub project_id: String,
    pub owner: String,
    pub status: JobStatus,
    /// Meaning depends on status: start time while running, request time after a cancel request
    pub since: DateTime<Utc>,
    pub info: Option<String>,
    /// Optimistic lock stamp, incremented by the store on every write
    pub version: u64,
}

impl JobRecord {
    /// Creates a running record that was never stored
    pub fn running(job_uuid: Uuid, project_id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            job_uuid,
            project_id: project_id.into(),
            owner: owner.into(),
            status: JobStatus::Running,
            since: Utc::now(),
            info: None,
            version: 0,
        }
    }
}

/// Scheduler job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Waiting,
    Running,
    CancelRequested,
    Done,
    Failed,
    Canceled,
}

impl JobStatus {
    /// Terminal states are never stored as active records
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Canceled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "WAITING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::CancelRequested => write!(f, "CANCEL_REQUESTED"),
            JobStatus::Done => write!(f, "DONE"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Canceled => write!(f, "CANCELED"),
        }
    }
}
