//! Test doubles for bus based tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use scanflow_core::domain::message::{DomainMessage, JobMessage, MessageId};
use scanflow_core::product::{ProductSetup, ProductSetupFile, ScanType};
use scanflow_delegate::DelegateJobService;
use scanflow_delegate::process::{ProcessScript, ScriptedLauncher};

use crate::bus::{AsyncMessageHandler, SyncMessageHandler};
use crate::config::Config;
use crate::error::Result;

/// Product configured on test delegate servers
pub const PRODUCT: &str = "PDS_CODESCAN";

/// Scheduler configuration with millisecond timings
pub fn fast_config() -> Config {
    Config {
        storage_read_wait: Duration::from_millis(1),
        adapter_retry_wait: Duration::from_millis(1),
        scan_poll_interval: Duration::from_millis(10),
        ..Config::default()
    }
}

/// Delegate server running scripted processes inside `dir`
pub fn delegate_service(
    dir: &tempfile::TempDir,
    script: ProcessScript,
) -> (Arc<DelegateJobService>, Arc<ScriptedLauncher>) {
    let mut config = scanflow_delegate::Config::new("scheduler-test".to_string(), dir.path().to_path_buf());
    config.check_interval = Duration::from_millis(10);
    config.auto_clean_workspace = false;

    let products = ProductSetupFile {
        server_id: "scheduler-test".to_string(),
        products: vec![ProductSetup {
            id: PRODUCT.to_string(),
            path: "/opt/pds/codescan.sh".to_string(),
            scan_type: ScanType::CodeScan,
            description: None,
            parameters: Default::default(),
            minutes_to_wait_for_product_result: None,
            timeout_granularity_minutes: None,
        }],
    };

    let launcher = ScriptedLauncher::new(script);
    let service = DelegateJobService::new(config, products, launcher.clone());
    (Arc::new(service), launcher)
}

/// Order of received messages across several recorders
pub type EventLog = Arc<Mutex<Vec<MessageId>>>;

pub fn event_log() -> EventLog {
    Arc::default()
}

/// Records every message it receives
#[derive(Default)]
pub struct Recorder {
    messages: Mutex<Vec<DomainMessage>>,
    log: Option<EventLog>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_log(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::default(),
            log: Some(log),
        })
    }

    pub fn messages(&self) -> Vec<DomainMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub async fn wait_for_count(&self, count: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.messages.lock().unwrap().len() < count {
            assert!(
                Instant::now() < deadline,
                "expected {} messages, got {:?}",
                count,
                self.messages()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record(&self, message: &DomainMessage) {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(message.id());
        }
        self.messages.lock().unwrap().push(message.clone());
    }
}

#[async_trait]
impl AsyncMessageHandler for Recorder {
    async fn receive_async(&self, message: &DomainMessage) -> Result<()> {
        self.record(message);
        Ok(())
    }
}

/// Answers requests with a fixed message kind
pub struct SyncRecorder {
    recorder: Arc<Recorder>,
    answer: fn(JobMessage) -> DomainMessage,
}

impl SyncRecorder {
    pub fn new(log: EventLog, answer: fn(JobMessage) -> DomainMessage) -> Arc<Self> {
        Arc::new(Self {
            recorder: Recorder::with_log(log),
            answer,
        })
    }

    pub fn messages(&self) -> Vec<DomainMessage> {
        self.recorder.messages()
    }
}

#[async_trait]
impl SyncMessageHandler for SyncRecorder {
    async fn receive_sync(&self, message: &DomainMessage) -> Result<DomainMessage> {
        self.recorder.record(message);
        Ok((self.answer)(message.job().clone()))
    }
}

/// Polls `condition` until it holds
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while !condition().await {
        assert!(Instant::now() < deadline, "condition not met within {:?}", timeout);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
