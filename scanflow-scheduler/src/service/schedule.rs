//! Schedule domain
//!
//! Owns the execution of scheduled jobs. A launch runs in its own task:
//! the job is marked started, the scan domain is asked synchronously to run
//! the scan and the answer decides the terminal message. Restart requests
//! are resolved here as well, including the purge of old product results.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use scanflow_core::domain::job::JobStatus;
use scanflow_core::domain::message::{DomainMessage, JobMessage, MessageId};
use scanflow_core::resilience::ResilientActionExecutor;

use crate::bus::{AsyncMessageHandler, MessageBus};
use crate::config::Config;
use crate::error::{Result, SchedulerError};
use crate::repository::{ProductResultStore, ScheduleStore, ScheduledJob};
use crate::service::{
    RESTART_CANCELED_ALREADY_FINISHED, RESTART_CANCELED_NOT_FOUND, UPDATE_ATTEMPTS, storage_executor,
};

#[derive(Clone)]
pub struct ScheduleHandler {
    bus: Arc<MessageBus>,
    jobs: Arc<dyn ScheduleStore>,
    results: Arc<dyn ProductResultStore>,
    reads: Arc<ResilientActionExecutor<SchedulerError>>,
    running: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl ScheduleHandler {
    pub fn new(
        config: &Config,
        bus: Arc<MessageBus>,
        jobs: Arc<dyn ScheduleStore>,
        results: Arc<dyn ProductResultStore>,
    ) -> Self {
        Self {
            bus,
            jobs,
            results,
            reads: Arc::new(storage_executor(config)),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn register(self: Arc<Self>, bus: &MessageBus) {
        for id in [
            MessageId::JobRestartRequested,
            MessageId::JobRestartTriggered,
            MessageId::JobCancelRequested,
        ] {
            bus.subscribe(id, self.clone()).await;
        }
    }

    /// Stores a new job and launches it
    pub async fn submit_job(&self, mut job: ScheduledJob) -> Result<Uuid> {
        if job.product_id.trim().is_empty() {
            return Err(SchedulerError::Validation("Job has no product".to_string()));
        }
        job.status = JobStatus::Waiting;
        job.version = 0;

        let job = self.jobs.save(job).await?;
        tracing::info!(
            "Job {} submitted for project {} (product {})",
            job.job_uuid,
            job.project_id,
            job.product_id
        );
        self.launch(job.job_uuid).await;
        Ok(job.job_uuid)
    }

    /// True while a launch task of the job is alive
    pub async fn is_executing(&self, job_uuid: Uuid) -> bool {
        self.running
            .lock()
            .await
            .get(&job_uuid)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Aborts all launch tasks
    pub async fn shutdown(&self) {
        for (job_uuid, handle) in self.running.lock().await.drain() {
            handle.abort();
            tracing::debug!("Aborted execution of job {}", job_uuid);
        }
    }

    /// Spawns the execution task unless one is alive already
    async fn launch(&self, job_uuid: Uuid) -> bool {
        let mut running = self.running.lock().await;
        if running.get(&job_uuid).is_some_and(|handle| !handle.is_finished()) {
            tracing::warn!("Job {} is still executing, no new launch", job_uuid);
            return false;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.execute(job_uuid).await;
            this.running.lock().await.remove(&job_uuid);
        });
        running.insert(job_uuid, handle);
        true
    }

    async fn execute(&self, job_uuid: Uuid) {
        let started = self
            .update(job_uuid, |job| {
                job.status = JobStatus::Running;
                job.started = Some(Utc::now());
                job.ended = None;
                job.info = None;
                true
            })
            .await;
        let job = match started {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::error!("Job {} not found, cannot launch", job_uuid);
                return;
            }
            Err(e) => {
                tracing::error!("Job {} could not be marked started: {}", job_uuid, e);
                return;
            }
        };

        let message = job_message(&job);
        self.bus.publish(DomainMessage::JobStarted(message.clone())).await;

        let (status, info) = match self.bus.request(DomainMessage::StartScan(message.clone())).await {
            Ok(DomainMessage::ScanDone(_)) => (JobStatus::Done, None),
            Ok(DomainMessage::ScanCanceled(_)) => (JobStatus::Canceled, None),
            Ok(DomainMessage::ScanFailed(answer)) => (JobStatus::Failed, answer.info),
            Ok(other) => (
                JobStatus::Failed,
                Some(format!("Unexpected scan answer {}", other.id())),
            ),
            Err(e) => (JobStatus::Failed, Some(e.to_string())),
        };

        let ended = self
            .update(job_uuid, |job| {
                job.status = status;
                job.ended = Some(Utc::now());
                job.info = info.clone();
                true
            })
            .await;
        if let Err(e) = ended {
            tracing::error!("Job {} could not be marked {}: {}", job_uuid, status, e);
        }

        tracing::info!("Job {} ended with {}", job_uuid, status);
        let message = match info {
            Some(info) => message.with_info(info),
            None => message,
        };
        let terminal = match status {
            JobStatus::Done => DomainMessage::JobDone(message),
            JobStatus::Canceled => DomainMessage::JobCanceled(message),
            _ => DomainMessage::JobFailed(message),
        };
        self.bus.publish(terminal).await;
    }

    async fn restart_requested(&self, request: &JobMessage, hard: bool) -> Result<()> {
        let job_uuid = request.job_uuid;
        let Some(job) = self.load(job_uuid).await? else {
            self.restart_canceled(request, RESTART_CANCELED_NOT_FOUND).await;
            return Ok(());
        };
        if job.is_ended() {
            self.restart_canceled(request, RESTART_CANCELED_ALREADY_FINISHED).await;
            return Ok(());
        }

        let message = job_message(&job);
        if hard || !self.results.has_results(job_uuid).await? {
            if let Err(reason) = self.purge(&message).await {
                let info = format!(
                    "Restart canceled, because job results could not be purged: {}",
                    reason
                );
                self.restart_canceled(request, &info).await;
                return Ok(());
            }
        } else {
            tracing::debug!("Job {} has product results, soft restart keeps them", job_uuid);
        }

        self.update(job_uuid, |job| {
            job.status = JobStatus::Waiting;
            job.started = None;
            job.ended = None;
            job.info = None;
            true
        })
        .await?;

        tracing::info!(
            "Restart of job {} triggered ({})",
            job_uuid,
            if hard { "hard" } else { "soft" }
        );
        self.bus.publish(DomainMessage::JobRestartTriggered(message)).await;
        Ok(())
    }

    /// Asks the scan domain to purge all product results of the job
    async fn purge(&self, message: &JobMessage) -> std::result::Result<(), String> {
        let answer = self
            .bus
            .request(DomainMessage::PurgeJobResultsRequest(message.clone()))
            .await;
        match answer {
            Ok(DomainMessage::JobResultsPurged(_)) => {
                self.bus
                    .publish(DomainMessage::JobResultsPurged(message.clone()))
                    .await;
                Ok(())
            }
            Ok(other) => Err(other
                .job()
                .info
                .clone()
                .unwrap_or_else(|| other.id().to_string())),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn restart_canceled(&self, request: &JobMessage, info: &str) {
        tracing::warn!("Restart of job {} canceled: {}", request.job_uuid, info);
        let message = request.clone().with_info(info);
        self.bus.publish(DomainMessage::JobRestartCanceled(message)).await;
    }

    async fn cancel_requested(&self, request: &JobMessage) -> Result<()> {
        let marked = self
            .update(request.job_uuid, |job| {
                if job.is_ended() {
                    return false;
                }
                job.status = JobStatus::CancelRequested;
                true
            })
            .await?;

        match marked {
            Some(job) => {
                self.bus
                    .publish(DomainMessage::JobCancellationRunning(job_message(&job)))
                    .await;
            }
            None => tracing::debug!("Job {} is unknown or ended, nothing to cancel", request.job_uuid),
        }
        Ok(())
    }

    async fn load(&self, job_uuid: Uuid) -> Result<Option<ScheduledJob>> {
        let jobs = &self.jobs;
        self.reads.execute(move || jobs.find(job_uuid)).await
    }

    /// Version checked update, `change` returns false to skip the write
    async fn update<F>(&self, job_uuid: Uuid, change: F) -> Result<Option<ScheduledJob>>
    where
        F: Fn(&mut ScheduledJob) -> bool + Send + Sync,
    {
        for _ in 0..UPDATE_ATTEMPTS {
            let Some(mut job) = self.load(job_uuid).await? else {
                return Ok(None);
            };
            if !change(&mut job) {
                return Ok(None);
            }
            match self.jobs.save(job).await {
                Ok(stored) => return Ok(Some(stored)),
                Err(SchedulerError::VersionConflict { .. }) => {
                    tracing::debug!("Job {} changed concurrently, reading again", job_uuid);
                }
                Err(e) => return Err(e),
            }
        }
        Err(SchedulerError::Transient(format!("Job {} could not be updated", job_uuid)))
    }
}

pub(crate) fn job_message(job: &ScheduledJob) -> JobMessage {
    let message = JobMessage::new(job.job_uuid)
        .with_project(job.project_id.as_str())
        .with_owner(job.owner.as_str());
    match &job.email {
        Some(email) => message.with_email(email.as_str()),
        None => message,
    }
}

#[async_trait]
impl AsyncMessageHandler for ScheduleHandler {
    async fn receive_async(&self, message: &DomainMessage) -> Result<()> {
        match message {
            DomainMessage::JobRestartRequested { job, hard } => {
                self.restart_requested(job, *hard).await
            }
            DomainMessage::JobRestartTriggered(job) => {
                self.launch(job.job_uuid).await;
                Ok(())
            }
            DomainMessage::JobCancelRequested(job) => self.cancel_requested(job).await,
            other => {
                tracing::warn!("Schedule ignores {}", other.id());
                Ok(())
            }
        }
    }
}
