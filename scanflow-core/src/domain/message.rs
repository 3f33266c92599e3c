//! Bus messages
//!
//! The closed set of messages exchanged between the scheduler domains.
//! Every message carries the job UUID; owner and e-mail are filled in
//! where the notification domain needs them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic identifier of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageId {
    JobStarted,
    JobDone,
    JobFailed,
    JobCanceled,
    JobCancelRequested,
    JobCancellationRunning,
    JobRestartRequested,
    JobRestartTriggered,
    JobRestartCanceled,
    PurgeJobResultsRequest,
    JobResultsPurged,
    JobResultsPurgeFailed,
    StartScan,
    ScanDone,
    ScanFailed,
    ScanCanceled,
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageId::JobStarted => "job-started",
            MessageId::JobDone => "job-done",
            MessageId::JobFailed => "job-failed",
            MessageId::JobCanceled => "job-canceled",
            MessageId::JobCancelRequested => "job-cancel-requested",
            MessageId::JobCancellationRunning => "job-cancellation-running",
            MessageId::JobRestartRequested => "job-restart-requested",
            MessageId::JobRestartTriggered => "job-restart-triggered",
            MessageId::JobRestartCanceled => "job-restart-canceled",
            MessageId::PurgeJobResultsRequest => "purge-job-results-request",
            MessageId::JobResultsPurged => "job-results-purged",
            MessageId::JobResultsPurgeFailed => "job-results-purge-failed",
            MessageId::StartScan => "start-scan",
            MessageId::ScanDone => "scan-done",
            MessageId::ScanFailed => "scan-failed",
            MessageId::ScanCanceled => "scan-canceled",
        };
        write!(f, "{}", name)
    }
}

/// Payload shared by all job messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_uuid: Uuid,
    pub project_id: Option<String>,
    pub owner: Option<String>,
    pub email: Option<String>,
    pub info: Option<String>,
    pub since: DateTime<Utc>,
}

impl JobMessage {
    pub fn new(job_uuid: Uuid) -> Self {
        Self {
            job_uuid,
            project_id: None,
            owner: None,
            email: None,
            info: None,
            since: Utc::now(),
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }
}

/// A message published on the bus
///
/// Messages are immutable once published; handlers receive shared references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DomainMessage {
    JobStarted(JobMessage),
    JobDone(JobMessage),
    JobFailed(JobMessage),
    JobCanceled(JobMessage),
    JobCancelRequested(JobMessage),
    JobCancellationRunning(JobMessage),
    JobRestartRequested { job: JobMessage, hard: bool },
    JobRestartTriggered(JobMessage),
    JobRestartCanceled(JobMessage),
    PurgeJobResultsRequest(JobMessage),
    JobResultsPurged(JobMessage),
    JobResultsPurgeFailed(JobMessage),
    StartScan(JobMessage),
    ScanDone(JobMessage),
    ScanFailed(JobMessage),
    ScanCanceled(JobMessage),
}

impl DomainMessage {
    /// Topic the message is published on
    pub fn id(&self) -> MessageId {
        match self {
            DomainMessage::JobStarted(_) => MessageId::JobStarted,
            DomainMessage::JobDone(_) => MessageId::JobDone,
            DomainMessage::JobFailed(_) => MessageId::JobFailed,
            DomainMessage::JobCanceled(_) => MessageId::JobCanceled,
            DomainMessage::JobCancelRequested(_) => MessageId::JobCancelRequested,
            DomainMessage::JobCancellationRunning(_) => MessageId::JobCancellationRunning,
            DomainMessage::JobRestartRequested { .. } => MessageId::JobRestartRequested,
            DomainMessage::JobRestartTriggered(_) => MessageId::JobRestartTriggered,
            DomainMessage::JobRestartCanceled(_) => MessageId::JobRestartCanceled,
            DomainMessage::PurgeJobResultsRequest(_) => MessageId::PurgeJobResultsRequest,
            DomainMessage::JobResultsPurged(_) => MessageId::JobResultsPurged,
            DomainMessage::JobResultsPurgeFailed(_) => MessageId::JobResultsPurgeFailed,
            DomainMessage::StartScan(_) => MessageId::StartScan,
            DomainMessage::ScanDone(_) => MessageId::ScanDone,
            DomainMessage::ScanFailed(_) => MessageId::ScanFailed,
            DomainMessage::ScanCanceled(_) => MessageId::ScanCanceled,
        }
    }

    /// Job payload of the message
    pub fn job(&self) -> &JobMessage {
        match self {
            DomainMessage::JobRestartRequested { job, .. } => job,
            DomainMessage::JobStarted(job)
            | DomainMessage::JobDone(job)
            | DomainMessage::JobFailed(job)
            | DomainMessage::JobCanceled(job)
            | DomainMessage::JobCancelRequested(job)
            | DomainMessage::JobCancellationRunning(job)
            | DomainMessage::JobRestartTriggered(job)
            | DomainMessage::JobRestartCanceled(job)
            | DomainMessage::PurgeJobResultsRequest(job)
            | DomainMessage::JobResultsPurged(job)
            | DomainMessage::JobResultsPurgeFailed(job)
            | DomainMessage::StartScan(job)
            | DomainMessage::ScanDone(job)
            | DomainMessage::ScanFailed(job)
            | DomainMessage::ScanCanceled(job) => job,
        }
    }

    pub fn job_uuid(&self) -> Uuid {
        self.job().job_uuid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_matches_variant() {
        let job = JobMessage::new(Uuid::new_v4());
        let restart = DomainMessage::JobRestartRequested {
            job: job.clone(),
            hard: true,
        };
        assert_eq!(restart.id(), MessageId::JobRestartRequested);
        assert_eq!(restart.job_uuid(), job.job_uuid);
        assert_eq!(
            DomainMessage::PurgeJobResultsRequest(job).id().to_string(),
            "purge-job-results-request"
        );
    }

    #[test]
    fn test_message_builder() {
        let message = JobMessage::new(Uuid::new_v4())
            .with_project("alpha")
            .with_owner("bob")
            .with_email("bob@example.org")
            .with_info("Restart canceled, because job not found!");

        assert_eq!(message.project_id.as_deref(), Some("alpha"));
        assert_eq!(message.owner.as_deref(), Some("bob"));
        assert_eq!(message.email.as_deref(), Some("bob@example.org"));
        assert!(message.info.unwrap().contains("not found"));
    }

    #[test]
    fn test_message_serialization_is_tagged() {
        let job = JobMessage::new(Uuid::new_v4());
        let json = serde_json::to_value(DomainMessage::JobRestartRequested { job, hard: false }).unwrap();
        assert_eq!(json["type"], "job-restart-requested");
        assert_eq!(json["hard"], false);
    }
}
