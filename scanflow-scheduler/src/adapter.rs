//! Delegate adapter
//!
//! The scan domain reaches delegate servers only through [`DelegateAdapter`].
//! [`LocalDelegateAdapter`] calls a delegate job service living in the same
//! process. [`ResilientDelegateAdapter`] wraps any adapter and retries calls
//! failing with transient errors; fatal errors pass through at once.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use scanflow_core::domain::delegate::{CancelResult, CreateJobRequest, DelegateJobStatus};
use scanflow_core::resilience::{ResilientActionExecutor, RetryProposal, RetryWhen};
use scanflow_delegate::DelegateJobService;

use crate::error::{Result, SchedulerError};

#[async_trait]
pub trait DelegateAdapter: Send + Sync {
    async fn create_job(&self, request: CreateJobRequest) -> Result<DelegateJobStatus>;

    async fn upload(&self, delegate_job_uuid: Uuid, file_name: &str, content: &[u8]) -> Result<()>;

    async fn mark_ready(&self, delegate_job_uuid: Uuid) -> Result<()>;

    async fn status(&self, delegate_job_uuid: Uuid) -> Result<DelegateJobStatus>;

    async fn result(&self, delegate_job_uuid: Uuid) -> Result<String>;

    async fn cancel(&self, delegate_job_uuid: Uuid) -> Result<CancelResult>;
}

/// Adapter over an in-process delegate job service
pub struct LocalDelegateAdapter {
    service: Arc<DelegateJobService>,
}

impl LocalDelegateAdapter {
    pub fn new(service: Arc<DelegateJobService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DelegateAdapter for LocalDelegateAdapter {
    async fn create_job(&self, request: CreateJobRequest) -> Result<DelegateJobStatus> {
        Ok(self.service.create_job(request).await?)
    }

    async fn upload(&self, delegate_job_uuid: Uuid, file_name: &str, content: &[u8]) -> Result<()> {
        Ok(self.service.upload(delegate_job_uuid, file_name, content).await?)
    }

    async fn mark_ready(&self, delegate_job_uuid: Uuid) -> Result<()> {
        Ok(self.service.mark_ready_to_start(delegate_job_uuid).await?)
    }

    async fn status(&self, delegate_job_uuid: Uuid) -> Result<DelegateJobStatus> {
        Ok(self.service.status(delegate_job_uuid).await?)
    }

    async fn result(&self, delegate_job_uuid: Uuid) -> Result<String> {
        Ok(self.service.result(delegate_job_uuid).await?)
    }

    async fn cancel(&self, delegate_job_uuid: Uuid) -> Result<CancelResult> {
        Ok(self.service.cancel(delegate_job_uuid).await?)
    }
}

/// Retries transient failures of the wrapped adapter
pub struct ResilientDelegateAdapter {
    inner: Arc<dyn DelegateAdapter>,
    executor: ResilientActionExecutor<SchedulerError>,
}

impl ResilientDelegateAdapter {
    pub fn new(inner: Arc<dyn DelegateAdapter>, retries: u32, wait: Duration) -> Self {
        let executor = ResilientActionExecutor::new()
            .with_consultant(RetryWhen::new(
                SchedulerError::is_transient,
                RetryProposal::fixed(retries, wait),
            ))
            .with_before_retry(|context| {
                tracing::debug!(
                    "Delegate call failed after {} retries, trying again: {}",
                    context.retries,
                    context.error
                );
            });
        Self { inner, executor }
    }
}

#[async_trait]
impl DelegateAdapter for ResilientDelegateAdapter {
    async fn create_job(&self, request: CreateJobRequest) -> Result<DelegateJobStatus> {
        let inner = &self.inner;
        let request = &request;
        self.executor
            .execute(move || inner.create_job(request.clone()))
            .await
    }

    async fn upload(&self, delegate_job_uuid: Uuid, file_name: &str, content: &[u8]) -> Result<()> {
        let inner = &self.inner;
        self.executor
            .execute(move || inner.upload(delegate_job_uuid, file_name, content))
            .await
    }

    async fn mark_ready(&self, delegate_job_uuid: Uuid) -> Result<()> {
        let inner = &self.inner;
        self.executor
            .execute(move || inner.mark_ready(delegate_job_uuid))
            .await
    }

    async fn status(&self, delegate_job_uuid: Uuid) -> Result<DelegateJobStatus> {
        let inner = &self.inner;
        self.executor.execute(move || inner.status(delegate_job_uuid)).await
    }

    async fn result(&self, delegate_job_uuid: Uuid) -> Result<String> {
        let inner = &self.inner;
        self.executor.execute(move || inner.result(delegate_job_uuid)).await
    }

    async fn cancel(&self, delegate_job_uuid: Uuid) -> Result<CancelResult> {
        let inner = &self.inner;
        self.executor.execute(move || inner.cancel(delegate_job_uuid)).await
    }
}
