//! Job Record Store
//!
//! Holds one record per active job, keyed by job UUID.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use scanflow_core::domain::job::JobRecord;

use crate::error::{Result, SchedulerError};

#[async_trait]
pub trait JobRecordStore: Send + Sync {
    async fn find(&self, job_uuid: Uuid) -> Result<Option<JobRecord>>;

    /// Inserts or replaces a record
    ///
    /// A record with version 0 may only be inserted, any other version must
    /// match the stored one. Returns the stored record with its new version.
    async fn save(&self, record: JobRecord) -> Result<JobRecord>;

    /// Removes a record, returns whether one existed
    async fn delete(&self, job_uuid: Uuid) -> Result<bool>;

    async fn all(&self) -> Result<Vec<JobRecord>>;
}

#[derive(Default)]
pub struct InMemoryJobRecordStore {
    records: RwLock<HashMap<Uuid, JobRecord>>,
}

impl InMemoryJobRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRecordStore for InMemoryJobRecordStore {
    async fn find(&self, job_uuid: Uuid) -> Result<Option<JobRecord>> {
        Ok(self.records.read().await.get(&job_uuid).cloned())
    }

    async fn save(&self, mut record: JobRecord) -> Result<JobRecord> {
        let mut records = self.records.write().await;
        let found = records.get(&record.job_uuid).map_or(0, |stored| stored.version);
        if found != record.version {
            return Err(SchedulerError::VersionConflict {
                job_uuid: record.job_uuid,
                expected: record.version,
                found,
            });
        }
        record.version += 1;
        records.insert(record.job_uuid, record.clone());
        Ok(record)
    }

    async fn delete(&self, job_uuid: Uuid) -> Result<bool> {
        Ok(self.records.write().await.remove(&job_uuid).is_some())
    }

    async fn all(&self) -> Result<Vec<JobRecord>> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|record| record.since);
        Ok(records)
    }
}
