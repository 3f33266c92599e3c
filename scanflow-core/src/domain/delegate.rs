//! Delegate job domain types
//!
//! A delegate job is the unit of work tracked by a delegate execution server.
//! It is correlated 1:1 with a scheduler job but has its own UUID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Delegate job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateJob {
    pub uuid: Uuid,
    pub sechub_job_uuid: Uuid,
    pub product_id: String,
    pub state: DelegateJobState,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    /// Parameters supplied by the caller
    pub parameters: HashMap<String, String>,
    /// Parameters computed by the scheduler
    pub generated: HashMap<String, String>,
    pub uploads: Vec<UploadRecord>,
    pub exit_code: Option<i32>,
    pub result: Option<String>,
    pub messages: Vec<UserMessage>,
    /// Optimistic lock stamp, incremented by the store on every write
    pub version: u64,
}

impl DelegateJob {
    /// Creates a job in `Created` state from a creation request
    pub fn new(request: CreateJobRequest) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            sechub_job_uuid: request.sechub_job_uuid,
            product_id: request.product_id,
            state: DelegateJobState::Created,
            created: Utc::now(),
            started: None,
            ended: None,
            parameters: request.parameters,
            generated: request.generated,
            uploads: Vec::new(),
            exit_code: None,
            result: None,
            messages: Vec::new(),
            version: 0,
        }
    }

    /// Snapshot of the lifecycle fields
    pub fn status(&self) -> DelegateJobStatus {
        DelegateJobStatus {
            uuid: self.uuid,
            sechub_job_uuid: self.sechub_job_uuid,
            product_id: self.product_id.clone(),
            state: self.state,
            created: self.created,
            started: self.started,
            ended: self.ended,
            exit_code: self.exit_code,
        }
    }
}

/// Delegate job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelegateJobState {
    Created,
    ReadyToStart,
    Running,
    Done,
    Failed,
    Canceled,
}

impl DelegateJobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DelegateJobState::Done | DelegateJobState::Failed | DelegateJobState::Canceled
        )
    }

    /// Uploads are accepted until the process has been launched
    pub fn accepts_uploads(self) -> bool {
        matches!(self, DelegateJobState::Created | DelegateJobState::ReadyToStart)
    }
}

impl std::fmt::Display for DelegateJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DelegateJobState::Created => write!(f, "CREATED"),
            DelegateJobState::ReadyToStart => write!(f, "READY_TO_START"),
            DelegateJobState::Running => write!(f, "RUNNING"),
            DelegateJobState::Done => write!(f, "DONE"),
            DelegateJobState::Failed => write!(f, "FAILED"),
            DelegateJobState::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// Request to create a delegate job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub sechub_job_uuid: Uuid,
    pub product_id: String,
    pub parameters: HashMap<String, String>,
    pub generated: HashMap<String, String>,
}

/// Metadata recorded for each upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub file_name: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// Message written by the product for the job owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub kind: UserMessageKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserMessageKind {
    Info,
    Warning,
    Error,
}

impl UserMessageKind {
    /// Derives the message kind from a message file name
    ///
    /// `ERROR_` and `WARNING_` prefixes select their kind, everything else is info.
    pub fn from_file_name(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        if upper.starts_with("ERROR_") {
            UserMessageKind::Error
        } else if upper.starts_with("WARNING_") {
            UserMessageKind::Warning
        } else {
            UserMessageKind::Info
        }
    }
}

/// Status snapshot returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateJobStatus {
    pub uuid: Uuid,
    pub sechub_job_uuid: Uuid,
    pub product_id: String,
    pub state: DelegateJobState,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

/// Outcome of a cancel request on the delegate server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelResult {
    /// Job was queued or running, cancellation is under way
    CancelDone,
    /// Job had already finished
    AlreadyDone,
    /// Job has not been marked ready yet
    NotPossible,
    NotFound,
}
