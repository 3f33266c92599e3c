//! Administration domain
//!
//! Keeps the active job records in line with lifecycle messages. Records
//! exist only for waiting and running jobs; a terminal message deletes them.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use scanflow_core::domain::job::{JobRecord, JobStatus};
use scanflow_core::domain::message::{DomainMessage, JobMessage, MessageId};

use crate::bus::{AsyncMessageHandler, MessageBus};
use crate::error::{Result, SchedulerError};
use crate::repository::JobRecordStore;
use crate::service::UPDATE_ATTEMPTS;

pub struct AdministrationHandler {
    records: Arc<dyn JobRecordStore>,
}

impl AdministrationHandler {
    pub fn new(records: Arc<dyn JobRecordStore>) -> Self {
        Self { records }
    }

    pub async fn register(self: Arc<Self>, bus: &MessageBus) {
        for id in [
            MessageId::JobStarted,
            MessageId::JobCancelRequested,
            MessageId::JobDone,
            MessageId::JobFailed,
            MessageId::JobCanceled,
        ] {
            bus.subscribe(id, self.clone()).await;
        }
    }

    /// Creates or overwrites the record of a started job
    async fn job_started(&self, message: &JobMessage) -> Result<()> {
        self.update(message.job_uuid, |existing| {
            let mut record = JobRecord::running(
                message.job_uuid,
                message.project_id.clone().unwrap_or_default(),
                message.owner.clone().unwrap_or_default(),
            );
            if let Some(existing) = existing {
                tracing::debug!("Job {} already has a record, overwriting it", message.job_uuid);
                record.version = existing.version;
            }
            Some(record)
        })
        .await
    }

    async fn cancel_requested(&self, message: &JobMessage) -> Result<()> {
        self.update(message.job_uuid, |existing| {
            existing.map(|mut record| {
                record.status = JobStatus::CancelRequested;
                record.since = Utc::now();
                record
            })
        })
        .await
    }

    async fn job_ended(&self, job_uuid: Uuid, status: JobStatus) -> Result<()> {
        if self.records.delete(job_uuid).await? {
            tracing::info!("Job {} ended with {}, record removed", job_uuid, status);
        } else {
            tracing::debug!("Job {} ended with {} but had no record", job_uuid, status);
        }
        Ok(())
    }

    /// Read-modify-write with retries on version conflicts
    ///
    /// `change` returns `None` to leave the store untouched.
    async fn update<F>(&self, job_uuid: Uuid, change: F) -> Result<()>
    where
        F: Fn(Option<JobRecord>) -> Option<JobRecord> + Send + Sync,
    {
        for _ in 0..UPDATE_ATTEMPTS {
            let existing = self.records.find(job_uuid).await?;
            let Some(record) = change(existing) else {
                tracing::debug!("No record of job {} to update", job_uuid);
                return Ok(());
            };
            let status = record.status;
            match self.records.save(record).await {
                Ok(stored) => {
                    tracing::debug!(
                        "Job {} record is {} (version {})",
                        job_uuid,
                        status,
                        stored.version
                    );
                    return Ok(());
                }
                Err(SchedulerError::VersionConflict { .. }) => {
                    tracing::debug!("Record of job {} changed concurrently, reading again", job_uuid);
                }
                Err(e) => return Err(e),
            }
        }
        Err(SchedulerError::Transient(format!(
            "Record of job {} could not be updated",
            job_uuid
        )))
    }
}

#[async_trait]
impl AsyncMessageHandler for AdministrationHandler {
    async fn receive_async(&self, message: &DomainMessage) -> Result<()> {
        match message {
            DomainMessage::JobStarted(job) => self.job_started(job).await,
            DomainMessage::JobCancelRequested(job) => self.cancel_requested(job).await,
            DomainMessage::JobDone(job) => self.job_ended(job.job_uuid, JobStatus::Done).await,
            DomainMessage::JobFailed(job) => self.job_ended(job.job_uuid, JobStatus::Failed).await,
            DomainMessage::JobCanceled(job) => {
                self.job_ended(job.job_uuid, JobStatus::Canceled).await
            }
            other => {
                tracing::warn!("Administration ignores {}", other.id());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryJobRecordStore;

    fn started(job_uuid: Uuid) -> DomainMessage {
        DomainMessage::JobStarted(
            JobMessage::new(job_uuid)
                .with_project("alpha")
                .with_owner("alice"),
        )
    }

    fn handler() -> (AdministrationHandler, Arc<InMemoryJobRecordStore>) {
        let records = Arc::new(InMemoryJobRecordStore::new());
        (AdministrationHandler::new(records.clone()), records)
    }

    #[tokio::test]
    async fn test_job_started_creates_record() {
        let (handler, records) = handler();
        let uuid = Uuid::new_v4();

        handler.receive_async(&started(uuid)).await.unwrap();

        let record = records.find(uuid).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert_eq!(record.project_id, "alpha");
        assert_eq!(record.owner, "alice");
    }

    #[tokio::test]
    async fn test_duplicate_job_started_overwrites() {
        let (handler, records) = handler();
        let uuid = Uuid::new_v4();

        handler.receive_async(&started(uuid)).await.unwrap();
        handler
            .receive_async(&DomainMessage::JobCancelRequested(JobMessage::new(uuid)))
            .await
            .unwrap();
        handler.receive_async(&started(uuid)).await.unwrap();

        let all = records.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, JobStatus::Running);
        assert_eq!(all[0].version, 3);
    }

    #[tokio::test]
    async fn test_cancel_requested_marks_record() {
        let (handler, records) = handler();
        let uuid = Uuid::new_v4();
        handler.receive_async(&started(uuid)).await.unwrap();

        handler
            .receive_async(&DomainMessage::JobCancelRequested(JobMessage::new(uuid)))
            .await
            .unwrap();

        assert_eq!(
            records.find(uuid).await.unwrap().unwrap().status,
            JobStatus::CancelRequested
        );
    }

    #[tokio::test]
    async fn test_cancel_requested_for_unknown_job_is_ignored() {
        let (handler, records) = handler();
        handler
            .receive_async(&DomainMessage::JobCancelRequested(JobMessage::new(Uuid::new_v4())))
            .await
            .unwrap();
        assert!(records.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_messages_delete_record() {
        let (handler, records) = handler();
        let done = Uuid::new_v4();
        let failed = Uuid::new_v4();
        let canceled = Uuid::new_v4();
        for uuid in [done, failed, canceled] {
            handler.receive_async(&started(uuid)).await.unwrap();
        }

        handler
            .receive_async(&DomainMessage::JobDone(JobMessage::new(done)))
            .await
            .unwrap();
        handler
            .receive_async(&DomainMessage::JobFailed(JobMessage::new(failed)))
            .await
            .unwrap();
        handler
            .receive_async(&DomainMessage::JobCanceled(JobMessage::new(canceled)))
            .await
            .unwrap();

        assert!(records.all().await.unwrap().is_empty());
    }
}
