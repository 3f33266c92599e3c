//! Product Result Store
//!
//! Tracks which delegate job executes the product of a scheduler job and
//! what it returned. A row is written as soon as the delegate job exists,
//! so a restarted scheduler can pick the delegate job up again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct ProductResult {
    pub job_uuid: Uuid,
    pub product_id: String,
    pub delegate_job_uuid: Option<Uuid>,
    pub result: Option<String>,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
}

impl ProductResult {
    pub fn started(job_uuid: Uuid, product_id: impl Into<String>, delegate_job_uuid: Uuid) -> Self {
        Self {
            job_uuid,
            product_id: product_id.into(),
            delegate_job_uuid: Some(delegate_job_uuid),
            result: None,
            started: Utc::now(),
            ended: None,
        }
    }
}

#[async_trait]
pub trait ProductResultStore: Send + Sync {
    async fn find(&self, job_uuid: Uuid) -> Result<Option<ProductResult>>;

    async fn save(&self, result: ProductResult) -> Result<()>;

    /// True when any product row exists for the job, finished or not
    async fn has_results(&self, job_uuid: Uuid) -> Result<bool> {
        Ok(self.find(job_uuid).await?.is_some())
    }

    /// Removes every product row of the job, returns how many were removed
    async fn delete_all(&self, job_uuid: Uuid) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemoryProductResultStore {
    results: RwLock<HashMap<Uuid, ProductResult>>,
}

impl InMemoryProductResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductResultStore for InMemoryProductResultStore {
    async fn find(&self, job_uuid: Uuid) -> Result<Option<ProductResult>> {
        Ok(self.results.read().await.get(&job_uuid).cloned())
    }

    async fn save(&self, result: ProductResult) -> Result<()> {
        self.results.write().await.insert(result.job_uuid, result);
        Ok(())
    }

    async fn delete_all(&self, job_uuid: Uuid) -> Result<usize> {
        Ok(usize::from(self.results.write().await.remove(&job_uuid).is_some()))
    }
}
