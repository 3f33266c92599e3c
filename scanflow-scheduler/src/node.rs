//! Scheduler node
//!
//! Wires stores, bus and domain handlers of one scheduler instance.

use std::sync::Arc;
use uuid::Uuid;

use crate::adapter::{DelegateAdapter, ResilientDelegateAdapter};
use crate::bus::MessageBus;
use crate::config::Config;
use crate::error::{Result, SchedulerError};
use crate::repository::{
    InMemoryJobRecordStore, InMemoryProductResultStore, InMemoryProjectStore, InMemoryScheduleStore,
    JobRecordStore, ProductResultStore, ProjectStore, ScheduleStore, ScheduledJob,
};
use crate::service::{
    AdministrationHandler, JobLifecycleService, Notification, NotificationHandler, ScanHandler,
    ScheduleHandler,
};

/// Storage used by a node
#[derive(Clone)]
pub struct Stores {
    pub records: Arc<dyn JobRecordStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub jobs: Arc<dyn ScheduleStore>,
    pub results: Arc<dyn ProductResultStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            records: Arc::new(InMemoryJobRecordStore::new()),
            projects: Arc::new(InMemoryProjectStore::new()),
            jobs: Arc::new(InMemoryScheduleStore::new()),
            results: Arc::new(InMemoryProductResultStore::new()),
        }
    }
}

pub struct SchedulerNode {
    bus: Arc<MessageBus>,
    stores: Stores,
    lifecycle: JobLifecycleService,
    schedule: Arc<ScheduleHandler>,
    notifications: Arc<NotificationHandler>,
}

impl SchedulerNode {
    /// Starts a node with its handlers registered on a fresh bus
    ///
    /// Delegate calls go through `adapter`, retried on transient failures.
    pub async fn start(config: Config, stores: Stores, adapter: Arc<dyn DelegateAdapter>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SchedulerError::Validation(e.to_string()))?;

        let bus = Arc::new(MessageBus::new());
        let adapter: Arc<dyn DelegateAdapter> = Arc::new(ResilientDelegateAdapter::new(
            adapter,
            config.adapter_retries,
            config.adapter_retry_wait,
        ));

        let administration = Arc::new(AdministrationHandler::new(Arc::clone(&stores.records)));
        let schedule = Arc::new(ScheduleHandler::new(
            &config,
            Arc::clone(&bus),
            Arc::clone(&stores.jobs),
            Arc::clone(&stores.results),
        ));
        let scan = Arc::new(ScanHandler::new(
            &config,
            adapter,
            Arc::clone(&stores.jobs),
            Arc::clone(&stores.results),
        ));
        let notifications = Arc::new(NotificationHandler::new());

        administration.register(&bus).await;
        Arc::clone(&schedule).register(&bus).await;
        scan.register(&bus).await?;
        Arc::clone(&notifications).register(&bus).await;

        let lifecycle = JobLifecycleService::new(
            &config,
            Arc::clone(&bus),
            Arc::clone(&stores.records),
            Arc::clone(&stores.projects),
        );

        tracing::info!("Scheduler node started");
        Ok(Self {
            bus,
            stores,
            lifecycle,
            schedule,
            notifications,
        })
    }

    pub fn lifecycle(&self) -> &JobLifecycleService {
        &self.lifecycle
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub async fn submit_job(&self, job: ScheduledJob) -> Result<Uuid> {
        self.schedule.submit_job(job).await
    }

    pub async fn notifications(&self, job_uuid: Uuid) -> Vec<Notification> {
        self.notifications.notifications_for(job_uuid).await
    }

    /// Stops launch tasks and bus workers
    pub async fn shutdown(&self) {
        self.schedule.shutdown().await;
        self.bus.shutdown().await;
        tracing::info!("Scheduler node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::LocalDelegateAdapter;
    use crate::repository::ProductResult;
    use crate::service::RESTART_CANCELED_ALREADY_FINISHED;
    use crate::testing::{PRODUCT, delegate_service, eventually, fast_config};
    use scanflow_core::domain::job::{JobRecord, JobStatus};
    use scanflow_core::domain::message::MessageId;
    use scanflow_core::product::ScanType;
    use scanflow_delegate::process::{ProcessScript, ScriptedLauncher};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        node: SchedulerNode,
        launcher: Arc<ScriptedLauncher>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(script: ProcessScript) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (delegate, launcher) = delegate_service(&dir, script);
        let node = SchedulerNode::start(
            fast_config(),
            Stores::in_memory(),
            Arc::new(LocalDelegateAdapter::new(delegate)),
        )
        .await
        .unwrap();
        Fixture {
            node,
            launcher,
            _dir: dir,
        }
    }

    fn job() -> ScheduledJob {
        ScheduledJob::new("alpha", "alice", PRODUCT, ScanType::CodeScan)
            .with_upload("sourcecode.zip", b"PK".to_vec())
    }

    async fn wait_for_status(node: &SchedulerNode, job_uuid: Uuid, expected: JobStatus) {
        let jobs = &node.stores().jobs;
        eventually(WAIT, move || async move {
            jobs.find(job_uuid).await.unwrap().is_some_and(|job| job.status == expected)
        })
        .await;
    }

    async fn notified(node: &SchedulerNode, job_uuid: Uuid) -> Vec<MessageId> {
        node.notifications(job_uuid).await.iter().map(|n| n.kind).collect()
    }

    #[tokio::test]
    async fn test_job_runs_to_done() {
        let fixture =
            fixture(ProcessScript::exiting(Duration::from_millis(50), 0).with_result("{\"findings\":[]}")).await;
        let node = &fixture.node;

        let job_uuid = node.submit_job(job()).await.unwrap();

        wait_for_status(node, job_uuid, JobStatus::Done).await;
        let result = node.stores().results.find(job_uuid).await.unwrap().unwrap();
        assert_eq!(result.result.as_deref(), Some("{\"findings\":[]}"));

        let records = &node.stores().records;
        eventually(WAIT, move || async move { records.all().await.unwrap().is_empty() }).await;
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_user_cancel_of_running_job() {
        let fixture = fixture(ProcessScript::hanging()).await;
        let node = &fixture.node;
        node.stores().projects.add_member("alice", "alpha").await.unwrap();

        let job_uuid = node.submit_job(job()).await.unwrap();
        let results = &node.stores().results;
        eventually(WAIT, move || async move {
            results.has_results(job_uuid).await.unwrap()
        })
        .await;
        let records = &node.stores().records;
        eventually(WAIT, move || async move {
            records.find(job_uuid).await.unwrap().is_some()
        })
        .await;

        node.lifecycle()
            .user_cancel_job(&job_uuid.to_string(), "alice")
            .await
            .unwrap();

        wait_for_status(node, job_uuid, JobStatus::Canceled).await;
        eventually(WAIT, move || async move {
            records.find(job_uuid).await.unwrap().is_none()
        })
        .await;
        eventually(WAIT, move || async move {
            let kinds = notified(node, job_uuid).await;
            kinds.contains(&MessageId::JobCancellationRunning) && kinds.contains(&MessageId::JobCanceled)
        })
        .await;
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_hard_restart_recovers_crashed_job() {
        let fixture = fixture(ProcessScript::exiting(Duration::from_millis(10), 0).with_result("ok")).await;
        let node = &fixture.node;
        let stores = node.stores();

        // state left behind by a crashed node
        let mut crashed = job();
        crashed.status = JobStatus::Running;
        let crashed = stores.jobs.save(crashed).await.unwrap();
        let job_uuid = crashed.job_uuid;
        stores
            .records
            .save(JobRecord::running(job_uuid, "alpha", "alice"))
            .await
            .unwrap();
        stores
            .results
            .save(ProductResult::started(job_uuid, PRODUCT, Uuid::new_v4()))
            .await
            .unwrap();

        node.lifecycle()
            .restart_job_hard(&job_uuid.to_string())
            .await
            .unwrap();

        wait_for_status(node, job_uuid, JobStatus::Done).await;
        assert_eq!(fixture.launcher.launched().len(), 1);
        let result = stores.results.find(job_uuid).await.unwrap().unwrap();
        assert_eq!(result.result.as_deref(), Some("ok"));
        eventually(WAIT, move || async move {
            let kinds = notified(node, job_uuid).await;
            kinds.contains(&MessageId::JobResultsPurged) && kinds.contains(&MessageId::JobRestartTriggered)
        })
        .await;
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_of_finished_job_is_canceled() {
        let fixture = fixture(ProcessScript::exiting(Duration::from_millis(10), 0).with_result("ok")).await;
        let node = &fixture.node;
        let job_uuid = node.submit_job(job()).await.unwrap();
        wait_for_status(node, job_uuid, JobStatus::Done).await;
        let records = &node.stores().records;
        eventually(WAIT, move || async move { records.all().await.unwrap().is_empty() }).await;

        node.lifecycle().restart_job(&job_uuid.to_string()).await.unwrap();

        eventually(WAIT, move || async move { !node.notifications(job_uuid).await.is_empty() }).await;
        let notifications = node.notifications(job_uuid).await;
        assert_eq!(notifications[0].kind, MessageId::JobRestartCanceled);
        assert!(notifications[0].text.ends_with(RESTART_CANCELED_ALREADY_FINISHED));
        assert_eq!(fixture.launcher.launched().len(), 1);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_soft_restart_resuming_finished_scan_leaves_no_record() {
        let fixture = fixture(ProcessScript::exiting(Duration::from_millis(10), 0).with_result("ok")).await;
        let node = &fixture.node;
        let stores = node.stores();
        let job_uuid = node.submit_job(job()).await.unwrap();
        wait_for_status(node, job_uuid, JobStatus::Done).await;
        let records = &stores.records;
        eventually(WAIT, move || async move { records.all().await.unwrap().is_empty() }).await;

        // node crashed after the scan finished but before the job was marked done
        let mut crashed = stores.jobs.find(job_uuid).await.unwrap().unwrap();
        crashed.status = JobStatus::Running;
        crashed.ended = None;
        stores.jobs.save(crashed).await.unwrap();
        stores
            .records
            .save(JobRecord::running(job_uuid, "alpha", "alice"))
            .await
            .unwrap();

        node.lifecycle().restart_job(&job_uuid.to_string()).await.unwrap();

        wait_for_status(node, job_uuid, JobStatus::Done).await;
        eventually(WAIT, move || async move { records.find(job_uuid).await.unwrap().is_none() }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(records.find(job_uuid).await.unwrap().is_none());
        assert_eq!(fixture.launcher.launched().len(), 1);
        node.shutdown().await;
    }
}
