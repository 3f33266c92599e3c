//! Schedule Store
//!
//! Jobs accepted by the scheduler together with everything needed to run
//! them again: configuration, parameters and the uploaded files.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use scanflow_core::domain::job::JobStatus;
use scanflow_core::product::ScanType;

use crate::error::{Result, SchedulerError};

/// A job as known to the schedule domain
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    pub job_uuid: Uuid,
    pub project_id: String,
    pub owner: String,
    pub email: Option<String>,
    pub product_id: String,
    pub scan_type: ScanType,
    /// Full job configuration as submitted
    pub configuration: serde_json::Value,
    /// Job parameters forwarded to the delegate
    pub parameters: HashMap<String, String>,
    /// Uploaded files as (file name, content)
    pub uploads: Vec<(String, Vec<u8>)>,
    pub status: JobStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub info: Option<String>,
    pub version: u64,
}

impl ScheduledJob {
    pub fn new(
        project_id: impl Into<String>,
        owner: impl Into<String>,
        product_id: impl Into<String>,
        scan_type: ScanType,
    ) -> Self {
        Self {
            job_uuid: Uuid::new_v4(),
            project_id: project_id.into(),
            owner: owner.into(),
            email: None,
            product_id: product_id.into(),
            scan_type,
            configuration: serde_json::Value::Null,
            parameters: HashMap::new(),
            uploads: Vec::new(),
            status: JobStatus::Waiting,
            created: Utc::now(),
            started: None,
            ended: None,
            info: None,
            version: 0,
        }
    }

    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_upload(mut self, file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.uploads.push((file_name.into(), content.into()));
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn is_ended(&self) -> bool {
        self.status.is_terminal()
    }
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn find(&self, job_uuid: Uuid) -> Result<Option<ScheduledJob>>;

    /// Inserts or replaces a job with the same version rules as the job record store
    async fn save(&self, job: ScheduledJob) -> Result<ScheduledJob>;
}

#[derive(Default)]
pub struct InMemoryScheduleStore {
    jobs: RwLock<HashMap<Uuid, ScheduledJob>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn find(&self, job_uuid: Uuid) -> Result<Option<ScheduledJob>> {
        Ok(self.jobs.read().await.get(&job_uuid).cloned())
    }

    async fn save(&self, mut job: ScheduledJob) -> Result<ScheduledJob> {
        let mut jobs = self.jobs.write().await;
        let found = jobs.get(&job.job_uuid).map_or(0, |stored| stored.version);
        if found != job.version {
            return Err(SchedulerError::VersionConflict {
                job_uuid: job.job_uuid,
                expected: job.version,
                found,
            });
        }
        job.version += 1;
        jobs.insert(job.job_uuid, job.clone());
        Ok(job)
    }
}
