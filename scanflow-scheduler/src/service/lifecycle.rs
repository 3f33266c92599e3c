//! Job Lifecycle Service
//!
//! Entry points for cancel and restart requests. Nothing here changes job
//! state directly: each request is turned into a bus message and the domain
//! currently responsible for the job acts on it.

use std::sync::Arc;
use uuid::Uuid;

use scanflow_core::domain::job::JobRecord;
use scanflow_core::domain::message::{DomainMessage, JobMessage};
use scanflow_core::error::parse_job_uuid;
use scanflow_core::resilience::ResilientActionExecutor;

use crate::bus::MessageBus;
use crate::config::Config;
use crate::error::{Result, SchedulerError};
use crate::repository::{JobRecordStore, ProjectStore};
use crate::service::{RESTART_CANCELED_ALREADY_FINISHED, storage_executor};

pub struct JobLifecycleService {
    bus: Arc<MessageBus>,
    records: Arc<dyn JobRecordStore>,
    projects: Arc<dyn ProjectStore>,
    reads: ResilientActionExecutor<SchedulerError>,
}

impl JobLifecycleService {
    pub fn new(
        config: &Config,
        bus: Arc<MessageBus>,
        records: Arc<dyn JobRecordStore>,
        projects: Arc<dyn ProjectStore>,
    ) -> Self {
        Self {
            bus,
            records,
            projects,
            reads: storage_executor(config),
        }
    }

    /// Requests cancellation of a job
    pub async fn cancel_job(&self, job_uuid: &str) -> Result<()> {
        let job_uuid = parse_job_uuid(job_uuid)?;
        let record = self.find_record(job_uuid).await?;

        let message = match record {
            Some(record) => job_message(&record),
            None => JobMessage::new(job_uuid),
        };
        tracing::info!("Cancel requested for job {}", job_uuid);
        self.bus.publish(DomainMessage::JobCancelRequested(message)).await;
        Ok(())
    }

    /// Requests cancellation on behalf of a user
    ///
    /// The user must be a member of the job's project.
    pub async fn user_cancel_job(&self, job_uuid: &str, user: &str) -> Result<()> {
        let job_uuid = parse_job_uuid(job_uuid)?;
        let record = self
            .find_record(job_uuid)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("Job {}", job_uuid)))?;

        if !self.projects.is_member(user, &record.project_id).await? {
            tracing::warn!(
                "User {} tried to cancel job {} of project {}",
                user,
                job_uuid,
                record.project_id
            );
            return Err(SchedulerError::NotAuthorized {
                user: user.to_string(),
                job_uuid,
            });
        }

        tracing::info!("User {} requested cancel of job {}", user, job_uuid);
        self.bus
            .publish(DomainMessage::JobCancelRequested(job_message(&record)))
            .await;
        Ok(())
    }

    /// Restarts a job, keeping product results that already exist
    pub async fn restart_job(&self, job_uuid: &str) -> Result<()> {
        self.restart(job_uuid, false).await
    }

    /// Restarts a job after purging all of its product results
    pub async fn restart_job_hard(&self, job_uuid: &str) -> Result<()> {
        self.restart(job_uuid, true).await
    }

    async fn restart(&self, job_uuid: &str, hard: bool) -> Result<()> {
        let job_uuid = parse_job_uuid(job_uuid)?;

        // terminal jobs have no record left
        let Some(record) = self.find_record(job_uuid).await? else {
            tracing::warn!("Job {} has no active record, restart canceled", job_uuid);
            let message = JobMessage::new(job_uuid).with_info(RESTART_CANCELED_ALREADY_FINISHED);
            self.bus.publish(DomainMessage::JobRestartCanceled(message)).await;
            return Ok(());
        };

        tracing::info!(
            "Restart ({}) requested for job {}",
            if hard { "hard" } else { "soft" },
            job_uuid
        );
        self.bus
            .publish(DomainMessage::JobRestartRequested {
                job: job_message(&record),
                hard,
            })
            .await;
        Ok(())
    }

    async fn find_record(&self, job_uuid: Uuid) -> Result<Option<JobRecord>> {
        let records = &self.records;
        self.reads.execute(move || records.find(job_uuid)).await
    }
}

fn job_message(record: &JobRecord) -> JobMessage {
    JobMessage::new(record.job_uuid)
        .with_project(record.project_id.as_str())
        .with_owner(record.owner.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryJobRecordStore, InMemoryProjectStore};
    use crate::testing::Recorder;
    use scanflow_core::domain::message::MessageId;
    use std::time::Duration;

    struct Fixture {
        service: JobLifecycleService,
        bus: Arc<MessageBus>,
        records: Arc<InMemoryJobRecordStore>,
        projects: Arc<InMemoryProjectStore>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(MessageBus::new());
        let records = Arc::new(InMemoryJobRecordStore::new());
        let projects = Arc::new(InMemoryProjectStore::new());
        let service = JobLifecycleService::new(
            &Config::default(),
            Arc::clone(&bus),
            records.clone(),
            projects.clone(),
        );
        Fixture {
            service,
            bus,
            records,
            projects,
        }
    }

    async fn running_job(fixture: &Fixture) -> Uuid {
        let uuid = Uuid::new_v4();
        fixture
            .records
            .save(JobRecord::running(uuid, "alpha", "alice"))
            .await
            .unwrap();
        uuid
    }

    #[tokio::test]
    async fn test_cancel_rejects_malformed_uuid() {
        let fixture = fixture();
        let err = fixture.service.cancel_job("no-uuid").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_publishes_request_without_touching_record() {
        let fixture = fixture();
        let recorder = Recorder::new();
        fixture
            .bus
            .subscribe(MessageId::JobCancelRequested, recorder.clone())
            .await;
        let uuid = running_job(&fixture).await;

        fixture.service.cancel_job(&uuid.to_string()).await.unwrap();

        recorder.wait_for_count(1, Duration::from_secs(5)).await;
        let message = &recorder.messages()[0];
        assert_eq!(message.job_uuid(), uuid);
        assert_eq!(message.job().owner.as_deref(), Some("alice"));
        assert_eq!(fixture.records.find(uuid).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_user_cancel_requires_membership() {
        let fixture = fixture();
        let recorder = Recorder::new();
        fixture
            .bus
            .subscribe(MessageId::JobCancelRequested, recorder.clone())
            .await;
        let uuid = running_job(&fixture).await;
        fixture.projects.add_member("alice", "alpha").await.unwrap();
        fixture.projects.add_member("mallory", "beta").await.unwrap();

        let err = fixture
            .service
            .user_cancel_job(&uuid.to_string(), "mallory")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotAuthorized { ref user, .. } if user == "mallory"));

        fixture
            .service
            .user_cancel_job(&uuid.to_string(), "alice")
            .await
            .unwrap();
        recorder.wait_for_count(1, Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_user_cancel_of_unknown_job() {
        let fixture = fixture();
        let err = fixture
            .service
            .user_cancel_job(&Uuid::new_v4().to_string(), "alice")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_restart_without_record_is_canceled() {
        let fixture = fixture();
        let canceled = Recorder::new();
        let requested = Recorder::new();
        fixture
            .bus
            .subscribe(MessageId::JobRestartCanceled, canceled.clone())
            .await;
        fixture
            .bus
            .subscribe(MessageId::JobRestartRequested, requested.clone())
            .await;

        let uuid = Uuid::new_v4();
        fixture.service.restart_job(&uuid.to_string()).await.unwrap();
        fixture.service.restart_job_hard(&uuid.to_string()).await.unwrap();

        canceled.wait_for_count(2, Duration::from_secs(5)).await;
        for message in canceled.messages() {
            assert_eq!(message.job_uuid(), uuid);
            assert_eq!(message.job().info.as_deref(), Some(RESTART_CANCELED_ALREADY_FINISHED));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(requested.messages().is_empty());
    }

    #[tokio::test]
    async fn test_restart_of_active_job_is_requested() {
        let fixture = fixture();
        let requested = Recorder::new();
        fixture
            .bus
            .subscribe(MessageId::JobRestartRequested, requested.clone())
            .await;
        let uuid = running_job(&fixture).await;

        fixture.service.restart_job(&uuid.to_string()).await.unwrap();
        fixture.service.restart_job_hard(&uuid.to_string()).await.unwrap();

        requested.wait_for_count(2, Duration::from_secs(5)).await;
        let hard: Vec<bool> = requested
            .messages()
            .iter()
            .map(|m| matches!(m, DomainMessage::JobRestartRequested { hard: true, .. }))
            .collect();
        assert_eq!(hard, vec![false, true]);
    }
}
