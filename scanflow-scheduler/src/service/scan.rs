//! Scan domain
//!
//! Runs the product of a job on a delegate server. A start-scan request
//! either resumes the delegate job recorded for the scheduler job or
//! creates a new one, uploads the job files and marks it ready. The
//! delegate is then polled until the job ends, the scan is canceled or the
//! maximum scan duration runs out.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use uuid::Uuid;

use scanflow_core::domain::delegate::{CreateJobRequest, DelegateJobState};
use scanflow_core::domain::message::{DomainMessage, JobMessage, MessageId};
use scanflow_core::parameter::ParameterRegistry;
use scanflow_core::parameter::catalog::{
    PRODUCT_IDENTIFIER, SCAN_CONFIGURATION, SCAN_TARGET_URL, SECHUB_JOB_UUID,
};
use scanflow_core::product::ScanType;
use scanflow_core::resilience::ResilientActionExecutor;

use crate::adapter::DelegateAdapter;
use crate::bus::{AsyncMessageHandler, MessageBus, SyncMessageHandler};
use crate::config::Config;
use crate::error::{Result, SchedulerError};
use crate::repository::{ProductResult, ProductResultStore, ScheduleStore, ScheduledJob};
use crate::service::storage_executor;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanOutcome {
    Done,
    Failed(String),
    Canceled,
}

pub struct ScanHandler {
    adapter: Arc<dyn DelegateAdapter>,
    jobs: Arc<dyn ScheduleStore>,
    results: Arc<dyn ProductResultStore>,
    registry: ParameterRegistry,
    poll_interval: Duration,
    max_duration: Duration,
    reads: ResilientActionExecutor<SchedulerError>,
    scans: Mutex<HashMap<Uuid, watch::Sender<bool>>>,
}

impl ScanHandler {
    pub fn new(
        config: &Config,
        adapter: Arc<dyn DelegateAdapter>,
        jobs: Arc<dyn ScheduleStore>,
        results: Arc<dyn ProductResultStore>,
    ) -> Self {
        Self {
            adapter,
            jobs,
            results,
            registry: ParameterRegistry::standard(),
            poll_interval: config.scan_poll_interval,
            max_duration: config.scan_max_duration,
            reads: storage_executor(config),
            scans: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(self: Arc<Self>, bus: &MessageBus) -> Result<()> {
        bus.register_sync_handler(MessageId::StartScan, self.clone()).await?;
        bus.register_sync_handler(MessageId::PurgeJobResultsRequest, self.clone())
            .await?;
        bus.subscribe(MessageId::JobCancelRequested, self).await;
        Ok(())
    }

    async fn start_scan(&self, request: &JobMessage) -> DomainMessage {
        let job_uuid = request.job_uuid;
        let (sender, receiver) = watch::channel(false);
        self.scans.lock().await.insert(job_uuid, sender);

        let outcome = self.scan(job_uuid, receiver).await;
        self.scans.lock().await.remove(&job_uuid);

        match outcome {
            Ok(ScanOutcome::Done) => DomainMessage::ScanDone(request.clone()),
            Ok(ScanOutcome::Canceled) => DomainMessage::ScanCanceled(request.clone()),
            Ok(ScanOutcome::Failed(reason)) => {
                tracing::warn!("Scan of job {} failed: {}", job_uuid, reason);
                DomainMessage::ScanFailed(request.clone().with_info(reason))
            }
            Err(e) => {
                tracing::error!("Scan of job {} failed: {}", job_uuid, e);
                DomainMessage::ScanFailed(request.clone().with_info(e.to_string()))
            }
        }
    }

    async fn scan(&self, job_uuid: Uuid, cancel: watch::Receiver<bool>) -> Result<ScanOutcome> {
        let jobs = &self.jobs;
        let job = self
            .reads
            .execute(move || jobs.find(job_uuid))
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("Job {}", job_uuid)))?;

        let delegate_job_uuid = match self.resumable(&job).await? {
            Some(delegate_job_uuid) => {
                tracing::info!(
                    "Resuming delegate job {} of job {}",
                    delegate_job_uuid,
                    job_uuid
                );
                delegate_job_uuid
            }
            None => self.create_delegate_job(&job).await?,
        };

        self.poll(&job, delegate_job_uuid, cancel).await
    }

    /// Delegate job of an earlier attempt that can still deliver a result
    async fn resumable(&self, job: &ScheduledJob) -> Result<Option<Uuid>> {
        let Some(delegate_job_uuid) = self
            .results
            .find(job.job_uuid)
            .await?
            .and_then(|existing| existing.delegate_job_uuid)
        else {
            return Ok(None);
        };

        match self.adapter.status(delegate_job_uuid).await {
            Ok(status) => match status.state {
                DelegateJobState::ReadyToStart
                | DelegateJobState::Running
                | DelegateJobState::Done
                | DelegateJobState::Failed => Ok(Some(delegate_job_uuid)),
                state => {
                    tracing::debug!(
                        "Delegate job {} is {}, creating a new one",
                        delegate_job_uuid,
                        state
                    );
                    Ok(None)
                }
            },
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_delegate_job(&self, job: &ScheduledJob) -> Result<Uuid> {
        let mut parameters = job.parameters.clone();
        parameters.insert(PRODUCT_IDENTIFIER.id.to_string(), job.product_id.clone());

        let request = CreateJobRequest {
            sechub_job_uuid: job.job_uuid,
            product_id: job.product_id.clone(),
            parameters: self.registry.sanitize(&parameters),
            generated: generated_parameters(job),
        };
        let created = self.adapter.create_job(request).await?;
        let delegate_job_uuid = created.uuid;
        self.results
            .save(ProductResult::started(
                job.job_uuid,
                job.product_id.as_str(),
                delegate_job_uuid,
            ))
            .await?;

        for (file_name, content) in &job.uploads {
            self.adapter
                .upload(delegate_job_uuid, file_name, content)
                .await?;
            tracing::debug!(
                "Uploaded {} ({} bytes) to delegate job {}",
                file_name,
                content.len(),
                delegate_job_uuid
            );
        }
        self.adapter.mark_ready(delegate_job_uuid).await?;

        tracing::info!(
            "Job {} runs as delegate job {} (product {})",
            job.job_uuid,
            delegate_job_uuid,
            job.product_id
        );
        Ok(delegate_job_uuid)
    }

    async fn poll(
        &self,
        job: &ScheduledJob,
        delegate_job_uuid: Uuid,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ScanOutcome> {
        let deadline = Instant::now() + self.max_duration;
        loop {
            if *cancel.borrow() {
                self.cancel_delegate_job(delegate_job_uuid).await;
                return Ok(ScanOutcome::Canceled);
            }

            let status = self.adapter.status(delegate_job_uuid).await?;
            match status.state {
                DelegateJobState::Done => {
                    let result = self.adapter.result(delegate_job_uuid).await?;
                    self.store_result(job, delegate_job_uuid, Some(result)).await?;
                    return Ok(ScanOutcome::Done);
                }
                DelegateJobState::Failed => {
                    let result = self.adapter.result(delegate_job_uuid).await.ok();
                    let reason = result.clone().unwrap_or_else(|| match status.exit_code {
                        Some(code) => format!("exit code {}", code),
                        None => "no result".to_string(),
                    });
                    self.store_result(job, delegate_job_uuid, result).await?;
                    return Ok(ScanOutcome::Failed(format!(
                        "Delegate job {} failed: {}",
                        delegate_job_uuid, reason
                    )));
                }
                DelegateJobState::Canceled => return Ok(ScanOutcome::Canceled),
                _ => {}
            }

            if Instant::now() >= deadline {
                self.cancel_delegate_job(delegate_job_uuid).await;
                return Ok(ScanOutcome::Failed(format!(
                    "Scan did not finish within {} minutes",
                    self.max_duration.as_secs() / 60
                )));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.changed() => {}
            }
        }
    }

    async fn store_result(
        &self,
        job: &ScheduledJob,
        delegate_job_uuid: Uuid,
        result: Option<String>,
    ) -> Result<()> {
        let started = self
            .results
            .find(job.job_uuid)
            .await?
            .map_or_else(Utc::now, |existing| existing.started);
        self.results
            .save(ProductResult {
                job_uuid: job.job_uuid,
                product_id: job.product_id.clone(),
                delegate_job_uuid: Some(delegate_job_uuid),
                result,
                started,
                ended: Some(Utc::now()),
            })
            .await
    }

    async fn cancel_delegate_job(&self, delegate_job_uuid: Uuid) {
        match self.adapter.cancel(delegate_job_uuid).await {
            Ok(result) => tracing::info!("Cancel of delegate job {}: {:?}", delegate_job_uuid, result),
            Err(e) => tracing::warn!("Cancel of delegate job {} failed: {}", delegate_job_uuid, e),
        }
    }

    async fn cancel_requested(&self, request: &JobMessage) -> Result<()> {
        let job_uuid = request.job_uuid;
        if let Some(scan) = self.scans.lock().await.get(&job_uuid) {
            tracing::info!("Stopping scan of job {}", job_uuid);
            let _ = scan.send(true);
            return Ok(());
        }

        // no scan in this process, the delegate job may still run
        if let Some(delegate_job_uuid) = self.unfinished_delegate_job(job_uuid).await? {
            self.cancel_delegate_job(delegate_job_uuid).await;
        }
        Ok(())
    }

    async fn unfinished_delegate_job(&self, job_uuid: Uuid) -> Result<Option<Uuid>> {
        Ok(self
            .results
            .find(job_uuid)
            .await?
            .filter(|existing| existing.ended.is_none())
            .and_then(|existing| existing.delegate_job_uuid))
    }

    async fn purge(&self, request: &JobMessage) -> DomainMessage {
        let job_uuid = request.job_uuid;
        match self.purge_results(job_uuid).await {
            Ok(count) => {
                tracing::info!("Purged {} product results of job {}", count, job_uuid);
                DomainMessage::JobResultsPurged(request.clone())
            }
            Err(e) => {
                tracing::error!("Product results of job {} not purged: {}", job_uuid, e);
                DomainMessage::JobResultsPurgeFailed(request.clone().with_info(e.to_string()))
            }
        }
    }

    /// Discards stale results, a delegate job still running is canceled first
    async fn purge_results(&self, job_uuid: Uuid) -> Result<usize> {
        if let Some(delegate_job_uuid) = self.unfinished_delegate_job(job_uuid).await? {
            self.cancel_delegate_job(delegate_job_uuid).await;
        }
        self.results.delete_all(job_uuid).await
    }
}

/// Values only the scheduler may set
fn generated_parameters(job: &ScheduledJob) -> HashMap<String, String> {
    let mut generated = HashMap::new();
    generated.insert(SECHUB_JOB_UUID.id.to_string(), job.job_uuid.to_string());
    generated.insert(
        SCAN_CONFIGURATION.id.to_string(),
        reduced_configuration(&job.configuration, job.scan_type).to_string(),
    );
    if let Some(url) = target_url(&job.configuration, job.scan_type) {
        generated.insert(SCAN_TARGET_URL.id.to_string(), url);
    }
    generated
}

/// Keeps the api version and the section of the product's scan type
fn reduced_configuration(configuration: &Value, scan_type: ScanType) -> Value {
    let mut reduced = Map::new();
    for key in ["apiVersion", scan_type.configuration_section()] {
        if let Some(value) = configuration.get(key) {
            reduced.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(reduced)
}

fn target_url(configuration: &Value, scan_type: ScanType) -> Option<String> {
    let section = configuration.get(scan_type.configuration_section())?;
    section
        .get("url")
        .and_then(Value::as_str)
        .or_else(|| {
            section
                .get("uris")
                .and_then(Value::as_array)
                .and_then(|uris| uris.first())
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

#[async_trait]
impl SyncMessageHandler for ScanHandler {
    async fn receive_sync(&self, message: &DomainMessage) -> Result<DomainMessage> {
        match message {
            DomainMessage::StartScan(job) => Ok(self.start_scan(job).await),
            DomainMessage::PurgeJobResultsRequest(job) => Ok(self.purge(job).await),
            other => Err(SchedulerError::Validation(format!(
                "Scan domain cannot answer {}",
                other.id()
            ))),
        }
    }
}

#[async_trait]
impl AsyncMessageHandler for ScanHandler {
    async fn receive_async(&self, message: &DomainMessage) -> Result<()> {
        match message {
            DomainMessage::JobCancelRequested(job) => self.cancel_requested(job).await,
            other => {
                tracing::warn!("Scan ignores {}", other.id());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::LocalDelegateAdapter;
    use crate::repository::{InMemoryProductResultStore, InMemoryScheduleStore};
    use crate::testing::{PRODUCT, delegate_service, eventually, fast_config};
    use scanflow_delegate::DelegateJobService;
    use scanflow_delegate::process::{ProcessScript, ScriptedLauncher};
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        handler: Arc<ScanHandler>,
        delegate: Arc<DelegateJobService>,
        launcher: Arc<ScriptedLauncher>,
        jobs: Arc<InMemoryScheduleStore>,
        results: Arc<InMemoryProductResultStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture_with(config: Config, script: ProcessScript) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (delegate, launcher) = delegate_service(&dir, script);
        let jobs = Arc::new(InMemoryScheduleStore::new());
        let results = Arc::new(InMemoryProductResultStore::new());
        let handler = Arc::new(ScanHandler::new(
            &config,
            Arc::new(LocalDelegateAdapter::new(Arc::clone(&delegate))),
            jobs.clone(),
            results.clone(),
        ));
        Fixture {
            handler,
            delegate,
            launcher,
            jobs,
            results,
            _dir: dir,
        }
    }

    fn fixture(script: ProcessScript) -> Fixture {
        fixture_with(fast_config(), script)
    }

    async fn stored_job(fixture: &Fixture) -> ScheduledJob {
        let job = ScheduledJob::new("alpha", "alice", PRODUCT, ScanType::CodeScan)
            .with_configuration(json!({
                "apiVersion": "1.0",
                "codeScan": { "fileSystem": { "folders": ["src"] } },
                "webScan": { "url": "https://example.org" }
            }))
            .with_parameter(SCAN_TARGET_URL.id, "https://attacker.example")
            .with_upload("sourcecode.zip", b"PK".to_vec());
        fixture.jobs.save(job).await.unwrap()
    }

    fn start(job: &ScheduledJob) -> DomainMessage {
        DomainMessage::StartScan(JobMessage::new(job.job_uuid))
    }

    async fn delegate_job_of(fixture: &Fixture, job_uuid: Uuid) -> Uuid {
        let results = &fixture.results;
        eventually(WAIT, move || async move {
            results.find(job_uuid).await.unwrap().is_some()
        })
        .await;
        fixture
            .results
            .find(job_uuid)
            .await
            .unwrap()
            .unwrap()
            .delegate_job_uuid
            .unwrap()
    }

    #[tokio::test]
    async fn test_scan_runs_delegate_job_to_done() {
        let fixture = fixture(
            ProcessScript::exiting(Duration::from_millis(20), 0).with_result("{\"findings\":[]}"),
        );
        let job = stored_job(&fixture).await;

        let answer = fixture.handler.receive_sync(&start(&job)).await.unwrap();

        assert_eq!(answer.id(), MessageId::ScanDone);
        let stored = fixture.results.find(job.job_uuid).await.unwrap().unwrap();
        assert_eq!(stored.result.as_deref(), Some("{\"findings\":[]}"));
        assert!(stored.ended.is_some());

        let launched = fixture.launcher.launched();
        assert_eq!(launched.len(), 1);
        let env = &launched[0].env;
        assert_eq!(env.get("SECHUB_JOB_UUID"), Some(&job.job_uuid.to_string()));
        assert!(!env.contains_key("PDS_SCAN_TARGET_URL"));
        let configuration: Value = serde_json::from_str(&env["PDS_SCAN_CONFIGURATION"]).unwrap();
        assert_eq!(
            configuration,
            json!({
                "apiVersion": "1.0",
                "codeScan": { "fileSystem": { "folders": ["src"] } }
            })
        );
    }

    #[tokio::test]
    async fn test_failing_product_fails_scan() {
        let fixture = fixture(
            ProcessScript::exiting(Duration::from_millis(10), 2).with_result("scanner crashed"),
        );
        let job = stored_job(&fixture).await;

        let answer = fixture.handler.receive_sync(&start(&job)).await.unwrap();

        assert_eq!(answer.id(), MessageId::ScanFailed);
        assert!(answer.job().info.as_deref().unwrap().ends_with("scanner crashed"));
    }

    #[tokio::test]
    async fn test_unknown_job_fails_scan() {
        let fixture = fixture(ProcessScript::hanging());
        let answer = fixture
            .handler
            .receive_sync(&DomainMessage::StartScan(JobMessage::new(Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(answer.id(), MessageId::ScanFailed);
        assert!(fixture.launcher.launched().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_request_stops_running_scan() {
        let fixture = fixture(ProcessScript::hanging());
        let job = stored_job(&fixture).await;

        let handler = Arc::clone(&fixture.handler);
        let message = start(&job);
        let scan = tokio::spawn(async move { handler.receive_sync(&message).await });

        let delegate_job_uuid = delegate_job_of(&fixture, job.job_uuid).await;
        let delegate = &fixture.delegate;
        eventually(WAIT, move || async move {
            delegate.status(delegate_job_uuid).await.unwrap().state == DelegateJobState::Running
        })
        .await;

        fixture
            .handler
            .receive_async(&DomainMessage::JobCancelRequested(JobMessage::new(job.job_uuid)))
            .await
            .unwrap();

        let answer = scan.await.unwrap().unwrap();
        assert_eq!(answer.id(), MessageId::ScanCanceled);
        eventually(WAIT, move || async move {
            delegate.status(delegate_job_uuid).await.unwrap().state == DelegateJobState::Canceled
        })
        .await;
    }

    #[tokio::test]
    async fn test_scan_exceeding_max_duration_fails() {
        let mut config = fast_config();
        config.scan_max_duration = Duration::from_millis(100);
        let fixture = fixture_with(config, ProcessScript::hanging());
        let job = stored_job(&fixture).await;

        let answer = fixture.handler.receive_sync(&start(&job)).await.unwrap();

        assert_eq!(answer.id(), MessageId::ScanFailed);
        assert!(answer.job().info.as_deref().unwrap().contains("did not finish"));
        let delegate_job_uuid = delegate_job_of(&fixture, job.job_uuid).await;
        let delegate = &fixture.delegate;
        eventually(WAIT, move || async move {
            delegate.status(delegate_job_uuid).await.unwrap().state == DelegateJobState::Canceled
        })
        .await;
    }

    #[tokio::test]
    async fn test_second_scan_resumes_finished_delegate_job() {
        let fixture = fixture(ProcessScript::exiting(Duration::from_millis(10), 0).with_result("ok"));
        let job = stored_job(&fixture).await;

        fixture.handler.receive_sync(&start(&job)).await.unwrap();
        let answer = fixture.handler.receive_sync(&start(&job)).await.unwrap();

        assert_eq!(answer.id(), MessageId::ScanDone);
        assert_eq!(fixture.launcher.launched().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_removes_results_so_next_scan_starts_fresh() {
        let fixture = fixture(ProcessScript::exiting(Duration::from_millis(10), 0).with_result("ok"));
        let job = stored_job(&fixture).await;
        fixture.handler.receive_sync(&start(&job)).await.unwrap();

        let answer = fixture
            .handler
            .receive_sync(&DomainMessage::PurgeJobResultsRequest(JobMessage::new(job.job_uuid)))
            .await
            .unwrap();
        assert_eq!(answer.id(), MessageId::JobResultsPurged);
        assert!(!fixture.results.has_results(job.job_uuid).await.unwrap());

        fixture.handler.receive_sync(&start(&job)).await.unwrap();
        assert_eq!(fixture.launcher.launched().len(), 2);
    }

    struct BrokenResults;

    #[async_trait]
    impl ProductResultStore for BrokenResults {
        async fn find(&self, _job_uuid: Uuid) -> Result<Option<ProductResult>> {
            Ok(None)
        }

        async fn save(&self, _result: ProductResult) -> Result<()> {
            Ok(())
        }

        async fn delete_all(&self, _job_uuid: Uuid) -> Result<usize> {
            Err(SchedulerError::Transient("result storage offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_purge_failure_is_answered() {
        let fixture = fixture(ProcessScript::hanging());
        let handler = ScanHandler::new(
            &fast_config(),
            Arc::new(LocalDelegateAdapter::new(Arc::clone(&fixture.delegate))),
            fixture.jobs.clone(),
            Arc::new(BrokenResults),
        );

        let answer = handler
            .receive_sync(&DomainMessage::PurgeJobResultsRequest(JobMessage::new(Uuid::new_v4())))
            .await
            .unwrap();

        assert_eq!(answer.id(), MessageId::JobResultsPurgeFailed);
        assert!(answer.job().info.as_deref().unwrap().contains("offline"));
    }

    #[test]
    fn test_generated_parameters_for_web_scan() {
        let job = ScheduledJob::new("alpha", "alice", "PDS_WEBSCAN", ScanType::WebScan).with_configuration(
            json!({
                "apiVersion": "1.0",
                "codeScan": { "fileSystem": { "folders": ["src"] } },
                "webScan": { "url": "https://example.org" }
            }),
        );

        let generated = generated_parameters(&job);

        assert_eq!(generated[SCAN_TARGET_URL.id], "https://example.org");
        assert_eq!(generated[SECHUB_JOB_UUID.id], job.job_uuid.to_string());
        let configuration: Value = serde_json::from_str(&generated[SCAN_CONFIGURATION.id]).unwrap();
        assert!(configuration.get("codeScan").is_none());
        assert_eq!(configuration["webScan"]["url"], "https://example.org");
    }

    #[test]
    fn test_target_url_from_uri_list() {
        let configuration = json!({ "infraScan": { "uris": ["https://intranet.example"] } });
        assert_eq!(
            target_url(&configuration, ScanType::InfraScan).as_deref(),
            Some("https://intranet.example")
        );
        assert_eq!(target_url(&configuration, ScanType::WebScan), None);
    }
}
