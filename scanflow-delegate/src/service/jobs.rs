//! Delegate job service
//!
//! Entry point for callers of a delegate server. Jobs are created, receive
//! their uploads and are then marked ready to start. From there a spawned
//! task waits for a worker permit and hands the job to the execution engine.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scanflow_core::domain::delegate::{
    CancelResult, CreateJobRequest, DelegateJob, DelegateJobState, DelegateJobStatus, UploadRecord,
    UserMessage,
};
use scanflow_core::parameter::ParameterRegistry;
use scanflow_core::product::ProductSetupFile;

use crate::config::Config;
use crate::error::{DelegateError, Result};
use crate::process::ProcessLauncher;
use crate::repository::{InMemoryJobRepository, JobRepository};
use crate::service::execution::ExecutionEngine;
use crate::workspace::{WorkspaceService, validate_upload_file_name};

const UPDATE_ATTEMPTS: u32 = 5;

/// A job between mark-ready and its final state
struct QueuedJob {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Facade over job storage, workspaces and the execution engine
pub struct DelegateJobService {
    config: Config,
    repository: Arc<dyn JobRepository>,
    workspaces: WorkspaceService,
    products: Arc<ProductSetupFile>,
    registry: ParameterRegistry,
    engine: Arc<ExecutionEngine>,
    permits: Arc<Semaphore>,
    queue: Arc<Mutex<HashMap<Uuid, QueuedJob>>>,
    /// Serializes upload metadata updates with moving the file into place
    uploads: Mutex<()>,
}

impl DelegateJobService {
    /// Creates a service with in-memory job storage
    pub fn new(config: Config, products: ProductSetupFile, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self::with_repository(config, Arc::new(InMemoryJobRepository::new()), products, launcher)
    }

    pub fn with_repository(
        config: Config,
        repository: Arc<dyn JobRepository>,
        products: ProductSetupFile,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let products = Arc::new(products);
        let engine = Arc::new(ExecutionEngine::new(
            config.clone(),
            Arc::clone(&repository),
            Arc::clone(&products),
            launcher,
        ));
        Self {
            workspaces: WorkspaceService::new(config.workspace_root.clone()),
            permits: Arc::new(Semaphore::new(config.worker_threads)),
            config,
            repository,
            products,
            registry: ParameterRegistry::standard(),
            engine,
            queue: Arc::new(Mutex::new(HashMap::new())),
            uploads: Mutex::new(()),
        }
    }

    /// Creates a job in CREATED state together with its workspace
    ///
    /// Values supplied for generated parameters are dropped.
    pub async fn create_job(&self, mut request: CreateJobRequest) -> Result<DelegateJobStatus> {
        if self.products.find(&request.product_id).is_none() {
            return Err(DelegateError::ProductNotFound(request.product_id));
        }
        request.parameters = self.registry.sanitize(&request.parameters);

        let job = self.repository.insert(DelegateJob::new(request)).await?;
        self.workspaces.create(job.uuid).await?;

        info!(
            "Created delegate job {} for job {} (product {})",
            job.uuid, job.sechub_job_uuid, job.product_id
        );
        Ok(job.status())
    }

    /// Stores one upload of a job that has not been launched yet
    ///
    /// The content only replaces an earlier upload of the same name after
    /// the metadata update succeeded.
    pub async fn upload(&self, uuid: Uuid, file_name: &str, content: &[u8]) -> Result<()> {
        validate_upload_file_name(file_name)?;
        accepting_uploads(self.find(uuid).await?)?;

        let workspace = self.workspaces.workspace(uuid);
        let staged = workspace.stage_upload(file_name, content).await?;
        let size = staged.size;

        let _guard = self.uploads.lock().await;
        let stored = match self.find(uuid).await.and_then(accepting_uploads) {
            Ok(mut job) => {
                job.uploads.retain(|upload| upload.file_name != file_name);
                job.uploads.push(UploadRecord {
                    file_name: file_name.to_string(),
                    size,
                    uploaded_at: Utc::now(),
                });
                // a conflict means the engine may already have started the job
                self.repository.update(job).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = stored {
            warn!("Upload {} for job {} rejected: {}", file_name, uuid, e);
            if let Err(discard) = workspace.discard_upload(staged).await {
                warn!("Failed to discard rejected upload {}: {}", file_name, discard);
            }
            return Err(e);
        }

        workspace.commit_upload(staged).await?;
        debug!("Upload {} done for job {} ({} bytes)", file_name, uuid, size);
        Ok(())
    }

    /// Queues a job for execution
    ///
    /// A READY_TO_START job without an execution task, left over from an
    /// earlier server run, is queued again.
    pub async fn mark_ready_to_start(&self, uuid: Uuid) -> Result<()> {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.config.queue_max {
            return Err(DelegateError::Validation(format!(
                "Execution queue is full ({} jobs), job {} not queued",
                self.config.queue_max, uuid
            )));
        }

        let mut job = self.find(uuid).await?;
        match job.state {
            DelegateJobState::Created => {
                job.state = DelegateJobState::ReadyToStart;
                self.repository.update(job).await?;
            }
            DelegateJobState::ReadyToStart if !queue.contains_key(&uuid) => {
                debug!("Job {} was ready without execution task, queueing it again", uuid);
            }
            state => {
                return Err(DelegateError::InvalidState {
                    uuid,
                    state,
                    operation: "mark ready to start",
                });
            }
        }

        let (cancel, cancel_rx) = watch::channel(false);
        let handle = self.spawn_execution(uuid, cancel_rx);
        queue.insert(uuid, QueuedJob { cancel, handle });

        info!("Job {} ready to start ({} queued)", uuid, queue.len());
        Ok(())
    }

    /// Queues every stored READY_TO_START job that has no execution task
    ///
    /// Called once after start, so jobs a previous shutdown put back to
    /// READY_TO_START run again. Jobs beyond the queue limit stay ready and
    /// can be queued later with [`Self::mark_ready_to_start`].
    pub async fn resume_ready_jobs(&self) -> Result<usize> {
        let mut queue = self.queue.lock().await;
        let mut resumed = 0;

        for job in self.repository.find_by_state(DelegateJobState::ReadyToStart).await? {
            if queue.contains_key(&job.uuid) {
                continue;
            }
            if queue.len() >= self.config.queue_max {
                warn!("Execution queue is full, job {} stays ready to start", job.uuid);
                continue;
            }
            let (cancel, cancel_rx) = watch::channel(false);
            let handle = self.spawn_execution(job.uuid, cancel_rx);
            queue.insert(job.uuid, QueuedJob { cancel, handle });
            resumed += 1;
        }

        if resumed > 0 {
            info!("Resumed {} ready job(s)", resumed);
        }
        Ok(resumed)
    }

    fn spawn_execution(&self, uuid: Uuid, cancel: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let repository = Arc::clone(&self.repository);
        let permits = Arc::clone(&self.permits);
        let queue = Arc::clone(&self.queue);

        tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => match engine.run(uuid, cancel).await {
                    Ok(Some(job)) => debug!("Execution of job {} finished as {}", uuid, job.state),
                    Ok(None) => debug!("Job {} was not executed", uuid),
                    Err(e) => {
                        error!("Execution of job {} failed: {}", uuid, e);
                        mark_failed(repository.as_ref(), uuid, &e).await;
                    }
                },
                Err(e) => warn!("Worker permits closed, job {} not executed: {}", uuid, e),
            }
            queue.lock().await.remove(&uuid);
        })
    }

    pub async fn status(&self, uuid: Uuid) -> Result<DelegateJobStatus> {
        Ok(self.find(uuid).await?.status())
    }

    /// Result text of a DONE or FAILED job
    pub async fn result(&self, uuid: Uuid) -> Result<String> {
        let job = self.find(uuid).await?;
        match (job.state, job.result) {
            (DelegateJobState::Done | DelegateJobState::Failed, Some(result)) => Ok(result),
            _ => Err(DelegateError::ResultNotAvailable(uuid)),
        }
    }

    pub async fn messages(&self, uuid: Uuid) -> Result<Vec<UserMessage>> {
        Ok(self.find(uuid).await?.messages)
    }

    /// Cancels a queued or running job
    pub async fn cancel(&self, uuid: Uuid) -> Result<CancelResult> {
        for _ in 0..UPDATE_ATTEMPTS {
            let Some(mut job) = self.repository.find(uuid).await? else {
                return Ok(CancelResult::NotFound);
            };

            match job.state {
                DelegateJobState::Created => return Ok(CancelResult::NotPossible),
                state if state.is_terminal() => return Ok(CancelResult::AlreadyDone),
                DelegateJobState::Running => {
                    self.signal_cancel(uuid).await;
                    info!("Cancel requested for running job {}", uuid);
                    return Ok(CancelResult::CancelDone);
                }
                _ => {
                    job.state = DelegateJobState::Canceled;
                    job.ended = Some(Utc::now());
                    match self.repository.update(job).await {
                        Ok(_) => {
                            self.signal_cancel(uuid).await;
                            info!("Canceled queued job {}", uuid);
                            return Ok(CancelResult::CancelDone);
                        }
                        Err(DelegateError::VersionConflict { .. }) => {
                            debug!("Job {} changed while canceling, reading again", uuid);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Err(DelegateError::Io(format!("Job {} could not be canceled", uuid)))
    }

    async fn signal_cancel(&self, uuid: Uuid) {
        match self.queue.lock().await.get(&uuid) {
            Some(queued) => {
                let _ = queued.cancel.send(true);
            }
            None => debug!("No execution task for job {}", uuid),
        }
    }

    /// Number of jobs that are ready or running
    pub async fn queued(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Stops all executions and puts running jobs back to READY_TO_START
    ///
    /// Aborting a task drops its process supervisor, which kills the process.
    pub async fn shutdown(&self) -> Result<()> {
        let queued: Vec<(Uuid, QueuedJob)> = self.queue.lock().await.drain().collect();
        for (uuid, job) in queued {
            job.handle.abort();
            let _ = job.handle.await;
            debug!("Stopped execution task of job {}", uuid);
        }

        for mut job in self.repository.find_by_state(DelegateJobState::Running).await? {
            let uuid = job.uuid;
            job.state = DelegateJobState::ReadyToStart;
            job.started = None;
            self.repository.update(job).await?;
            info!("Job {} reset to {}", uuid, DelegateJobState::ReadyToStart);
        }
        Ok(())
    }

    async fn find(&self, uuid: Uuid) -> Result<DelegateJob> {
        self.repository
            .find(uuid)
            .await?
            .ok_or(DelegateError::JobNotFound(uuid))
    }
}

fn accepting_uploads(job: DelegateJob) -> Result<DelegateJob> {
    if job.state.accepts_uploads() {
        Ok(job)
    } else {
        Err(DelegateError::InvalidState {
            uuid: job.uuid,
            state: job.state,
            operation: "upload",
        })
    }
}

/// Best effort FAILED state for a job whose execution broke off
async fn mark_failed(repository: &dyn JobRepository, uuid: Uuid, cause: &DelegateError) {
    for _ in 0..UPDATE_ATTEMPTS {
        let mut job = match repository.find(uuid).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                error!("Job {} not marked failed, storage unavailable: {}", uuid, e);
                return;
            }
        };
        if job.state.is_terminal() {
            return;
        }

        job.state = DelegateJobState::Failed;
        job.result = Some(format!("Execution of job uuid:{} broke off: {}", uuid, cause));
        job.ended = Some(Utc::now());
        match repository.update(job).await {
            Ok(_) => {
                info!("Job {} marked {}", uuid, DelegateJobState::Failed);
                return;
            }
            Err(DelegateError::VersionConflict { .. }) => {
                debug!("Job {} changed while marking it failed, reading again", uuid);
            }
            Err(e) => {
                error!("Job {} not marked failed: {}", uuid, e);
                return;
            }
        }
    }
}
