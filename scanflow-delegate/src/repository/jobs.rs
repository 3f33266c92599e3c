//! Delegate job repository

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use scanflow_core::domain::delegate::{DelegateJob, DelegateJobState};

use crate::error::{DelegateError, Result};

/// Storage of delegate job records
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find(&self, uuid: Uuid) -> Result<Option<DelegateJob>>;

    /// Stores a new record with version 1
    async fn insert(&self, job: DelegateJob) -> Result<DelegateJob>;

    /// Replaces a record if its stored version equals `job.version`
    ///
    /// Returns the stored record with the incremented version.
    async fn update(&self, job: DelegateJob) -> Result<DelegateJob>;

    async fn find_by_state(&self, state: DelegateJobState) -> Result<Vec<DelegateJob>>;
}

/// In-memory implementation of JobRepository
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, DelegateJob>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find(&self, uuid: Uuid) -> Result<Option<DelegateJob>> {
        Ok(self.jobs.read().await.get(&uuid).cloned())
    }

    async fn insert(&self, mut job: DelegateJob) -> Result<DelegateJob> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.uuid) {
            return Err(DelegateError::Validation(format!(
                "Delegate job {} already exists",
                job.uuid
            )));
        }
        job.version = 1;
        jobs.insert(job.uuid, job.clone());
        Ok(job)
    }

    async fn update(&self, mut job: DelegateJob) -> Result<DelegateJob> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs.get(&job.uuid).ok_or(DelegateError::JobNotFound(job.uuid))?;
        if stored.version != job.version {
            return Err(DelegateError::VersionConflict {
                uuid: job.uuid,
                expected: job.version,
                found: stored.version,
            });
        }
        job.version += 1;
        jobs.insert(job.uuid, job.clone());
        Ok(job)
    }

    async fn find_by_state(&self, state: DelegateJobState) -> Result<Vec<DelegateJob>> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.state == state)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created);
        Ok(jobs)
    }
}
