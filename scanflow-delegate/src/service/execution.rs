//! Execution engine
//!
//! Takes one delegate job from READY_TO_START to a final state:
//! - Resolving parameters and the product timeout
//! - Staging uploads into the job workspace
//! - Launching the product process with the contract environment
//! - Supervising the process until it exits, times out or gets canceled
//!
//! Nothing below `run` propagates process problems as errors. They end up
//! as FAILED or CANCELED states carrying a result text.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scanflow_core::domain::delegate::{DelegateJob, DelegateJobState};
use scanflow_core::parameter::ResolvedParameters;
use scanflow_core::parameter::catalog::{
    ADD_SCRIPTLOG_TO_PDSLOG_ENABLED, CANCEL_EVENT_CHECKINTERVAL_MILLISECONDS,
    CANCEL_MAXIMUM_WAITTIME_SECONDS, JOBSTORAGE_READ_RESILIENCE_RETRIES_MAX,
    JOBSTORAGE_READ_RESILIENCE_RETRY_WAIT_SECONDS, PRODUCT_IDENTIFIER, PRODUCT_TIMEOUT_MINUTES,
    SECHUB_JOB_UUID, SUPPORTED_DATATYPES,
};
use scanflow_core::parameter::ParameterRegistry;
use scanflow_core::product::{ProductSetup, ProductSetupFile, SupportedDataType, parse_supported_data_types};
use scanflow_core::resilience::{ResilientActionExecutor, RetryProposal, RetryWhen};
use scanflow_core::timeout::resolve_timeout_minutes;

use crate::config::Config;
use crate::environment::build_environment;
use crate::error::{DelegateError, Result};
use crate::execution::{ExecutionOutcome, MonitorResult};
use crate::process::{LaunchRequest, ProcessLauncher, ProcessSupervisor};
use crate::repository::JobRepository;
use crate::workspace::{JobWorkspace, WorkspaceService};

/// Attempts to store a state change before giving up
const SAVE_ATTEMPTS: u32 = 5;

/// Timing values of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimings {
    pub product_timeout: Duration,
    /// Cooperative window after a cancel, zero destroys at once
    pub cancel_max_wait: Duration,
    pub check_interval: Duration,
}

impl ExecutionTimings {
    /// Job parameters first, server configuration as fallback
    pub fn resolve(parameters: &ResolvedParameters, timeout_minutes: u64, config: &Config) -> Self {
        let cancel_max_wait = parameters
            .get_u64(CANCEL_MAXIMUM_WAITTIME_SECONDS.id)
            .map(Duration::from_secs)
            .unwrap_or(config.cancel_max_wait);

        let check_interval = parameters
            .get_u64(CANCEL_EVENT_CHECKINTERVAL_MILLISECONDS.id)
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
            .unwrap_or(config.check_interval);

        Self {
            product_timeout: Duration::from_secs(timeout_minutes.saturating_mul(60)),
            cancel_max_wait,
            check_interval,
        }
    }
}

/// Supervises a launched process until it ends
///
/// The cancel flag and the deadline are checked once per check interval.
/// Both end in [`terminate`].
pub async fn monitor(
    process: &mut dyn ProcessSupervisor,
    timings: &ExecutionTimings,
    cancel: &watch::Receiver<bool>,
    workspace: &JobWorkspace,
) -> MonitorResult {
    let deadline = Instant::now() + timings.product_timeout;
    loop {
        let canceled = *cancel.borrow();
        if canceled {
            terminate(process, timings, workspace).await;
            return MonitorResult::Canceled;
        }

        let now = Instant::now();
        if now >= deadline {
            warn!("Product exceeded {:?}, terminating", timings.product_timeout);
            terminate(process, timings, workspace).await;
            return MonitorResult::TimedOut;
        }

        let slice = timings.check_interval.min(deadline - now);
        if process.wait_for(slice).await {
            return MonitorResult::Exited(process.exit_value());
        }
    }
}

/// Ends a process, cooperatively first when a window is configured
pub async fn terminate(
    process: &mut dyn ProcessSupervisor,
    timings: &ExecutionTimings,
    workspace: &JobWorkspace,
) {
    if !timings.cancel_max_wait.is_zero() {
        if let Err(e) = workspace.send_cancel_event().await {
            warn!("Failed to send cancel event: {}", e);
        }

        let deadline = Instant::now() + timings.cancel_max_wait;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if process.wait_for(timings.check_interval.min(deadline - now)).await {
                debug!("Process ended within cancel window");
                return;
            }
        }
        info!(
            "Process still alive after {:?}, destroying it",
            timings.cancel_max_wait
        );
    }

    process.destroy_forcibly();
    process.wait_for(timings.check_interval).await;
}

/// Runs delegate jobs
pub struct ExecutionEngine {
    config: Config,
    repository: Arc<dyn JobRepository>,
    workspaces: WorkspaceService,
    products: Arc<ProductSetupFile>,
    registry: ParameterRegistry,
    launcher: Arc<dyn ProcessLauncher>,
}

impl ExecutionEngine {
    pub fn new(
        config: Config,
        repository: Arc<dyn JobRepository>,
        products: Arc<ProductSetupFile>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let workspaces = WorkspaceService::new(config.workspace_root.clone());
        Self {
            config,
            repository,
            workspaces,
            products,
            registry: ParameterRegistry::standard(),
            launcher,
        }
    }

    /// Executes a job that is ready to start
    ///
    /// Returns the final job record, or `None` when the job was no longer
    /// ready (canceled while queued, or already handled).
    pub async fn run(&self, uuid: Uuid, cancel: watch::Receiver<bool>) -> Result<Option<DelegateJob>> {
        let Some(job) = self.start(uuid).await? else {
            return Ok(None);
        };
        let workspace = self.workspaces.workspace(uuid);

        let mut outcome = self.execute(&job, &workspace, &cancel).await;

        let canceled = *cancel.borrow();
        if canceled && !matches!(outcome, ExecutionOutcome::Canceled { .. }) {
            debug!("Job {} was canceled, discarding {:?} outcome", uuid, outcome.state());
            outcome = ExecutionOutcome::Canceled {
                messages: outcome.messages().to_vec(),
            };
        }

        let job = self.finish(uuid, &outcome).await?;
        info!("Job {} ended with state {}", uuid, job.state);

        if self.config.auto_clean_workspace {
            if let Err(e) = workspace.cleanup().await {
                warn!("Workspace of job {} not cleaned: {}", uuid, e);
            }
        }

        Ok(Some(job))
    }

    /// Moves the job from READY_TO_START to RUNNING
    async fn start(&self, uuid: Uuid) -> Result<Option<DelegateJob>> {
        for _ in 0..SAVE_ATTEMPTS {
            let mut job = self
                .repository
                .find(uuid)
                .await?
                .ok_or(DelegateError::JobNotFound(uuid))?;

            if job.state != DelegateJobState::ReadyToStart {
                debug!("Job {} is {}, not starting it", uuid, job.state);
                return Ok(None);
            }

            job.state = DelegateJobState::Running;
            job.started = Some(Utc::now());
            match self.repository.update(job).await {
                Ok(job) => return Ok(Some(job)),
                Err(DelegateError::VersionConflict { .. }) => {
                    debug!("Job {} changed while starting, reading again", uuid);
                }
                Err(e) => return Err(e),
            }
        }
        Err(DelegateError::Io(format!("Job {} could not be marked running", uuid)))
    }

    /// Stores the final state
    async fn finish(&self, uuid: Uuid, outcome: &ExecutionOutcome) -> Result<DelegateJob> {
        let mut last_error = None;
        for _ in 0..SAVE_ATTEMPTS {
            let mut job = self
                .repository
                .find(uuid)
                .await?
                .ok_or(DelegateError::JobNotFound(uuid))?;
            outcome.apply_to(&mut job);
            match self.repository.update(job).await {
                Ok(job) => return Ok(job),
                Err(e @ DelegateError::VersionConflict { .. }) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or(DelegateError::JobNotFound(uuid)))
    }

    async fn execute(
        &self,
        job: &DelegateJob,
        workspace: &JobWorkspace,
        cancel: &watch::Receiver<bool>,
    ) -> ExecutionOutcome {
        match self.launch_and_monitor(job, workspace, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Execution of job uuid:{} failed: {}", job.uuid, e);
                ExecutionOutcome::Failure {
                    exit_code: -1,
                    result: format!(
                        "Execution of job uuid:{} failed. Please look into delegate logs for details and search for former string.",
                        job.uuid
                    ),
                    messages: workspace.collect_messages().await.unwrap_or_default(),
                }
            }
        }
    }

    async fn launch_and_monitor(
        &self,
        job: &DelegateJob,
        workspace: &JobWorkspace,
        cancel: &watch::Receiver<bool>,
    ) -> Result<ExecutionOutcome> {
        let product = self
            .products
            .find(&job.product_id)
            .ok_or_else(|| DelegateError::ProductNotFound(job.product_id.clone()))?;

        let parameters = self.resolve_parameters(job, product);
        if !parameters.missing_mandatory().is_empty() {
            return Err(DelegateError::Validation(format!(
                "Missing mandatory parameters: {}",
                parameters.missing_mandatory().join(", ")
            )));
        }

        let timeout_minutes = resolve_timeout_minutes(
            parameters.get_u64(PRODUCT_TIMEOUT_MINUTES.id),
            product.minutes_to_wait_for_product_result,
            product.timeout_granularity_minutes,
            self.config.timeout_limits(),
        );
        let timings = ExecutionTimings::resolve(&parameters, timeout_minutes, &self.config);

        let supported = supported_data_types(&parameters, product);
        let supported = supported.as_slice();
        let preparation = storage_executor(&parameters)
            .execute(move || workspace.prepare(supported))
            .await?;

        workspace
            .write_metadata(&metadata(job, product, timeout_minutes))
            .await?;

        let env = build_environment(
            job,
            workspace,
            preparation,
            &parameters,
            inherited_environment(),
            &self.config.script_env_whitelist,
        );

        let request = LaunchRequest {
            program: PathBuf::from(&product.path),
            args: Vec::new(),
            working_dir: workspace.folder().to_path_buf(),
            env,
            stdout_file: workspace.system_out_file(),
            stderr_file: workspace.system_error_file(),
        };

        info!(
            "Launching {} for job {} (timeout {} minutes)",
            product.id, job.uuid, timeout_minutes
        );
        let mut process = self.launcher.start(request).await?;

        let monitored = monitor(process.as_mut(), &timings, cancel, workspace).await;
        debug!("Job {} monitoring ended: {:?}", job.uuid, monitored);

        if parameters.is_enabled(ADD_SCRIPTLOG_TO_PDSLOG_ENABLED.id) {
            log_script_output(job.uuid, workspace).await;
        }

        let messages = match workspace.collect_messages().await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Failed to collect messages of job {}: {}", job.uuid, e);
                Vec::new()
            }
        };

        let outcome = match monitored {
            MonitorResult::Canceled => ExecutionOutcome::Canceled { messages },
            MonitorResult::TimedOut => ExecutionOutcome::Timeout { messages },
            MonitorResult::Exited(0) => match workspace.read_result().await {
                Ok(Some(result)) => ExecutionOutcome::Success { result, messages },
                Ok(None) => {
                    let headline = format!("Result file not found at {}", workspace.result_file().display());
                    ExecutionOutcome::Failure {
                        exit_code: 0,
                        result: with_process_output(workspace, headline).await,
                        messages,
                    }
                }
                Err(e) => ExecutionOutcome::Failure {
                    exit_code: 0,
                    result: unreadable_result(job.uuid, workspace, &e),
                    messages,
                },
            },
            MonitorResult::Exited(exit_code) => {
                let result = match workspace.read_result().await {
                    Ok(Some(result)) => result,
                    Ok(None) => {
                        with_process_output(workspace, format!("Product exited with code {}", exit_code)).await
                    }
                    Err(e) => unreadable_result(job.uuid, workspace, &e),
                };
                ExecutionOutcome::Failure {
                    exit_code,
                    result,
                    messages,
                }
            }
        };

        Ok(outcome)
    }

    fn resolve_parameters(&self, job: &DelegateJob, product: &ProductSetup) -> ResolvedParameters {
        let mut supplied = job.parameters.clone();
        supplied
            .entry(PRODUCT_IDENTIFIER.id.to_string())
            .or_insert_with(|| job.product_id.clone());

        let mut generated: HashMap<String, String> =
            [(SECHUB_JOB_UUID.id.to_string(), job.sechub_job_uuid.to_string())].into();
        generated.extend(job.generated.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.registry.resolve(product, &supplied, &generated)
    }
}

/// Server environment, variables that are not valid unicode are skipped
fn inherited_environment() -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

fn supported_data_types(parameters: &ResolvedParameters, product: &ProductSetup) -> Vec<SupportedDataType> {
    parameters
        .get(SUPPORTED_DATATYPES.id)
        .and_then(|value| match parse_supported_data_types(value) {
            Ok(types) => Some(types),
            Err(e) => {
                warn!("Ignoring job data types: {}", e);
                None
            }
        })
        .unwrap_or_else(|| product.supported_data_types())
}

/// Executor for workspace storage reads
fn storage_executor(parameters: &ResolvedParameters) -> ResilientActionExecutor<DelegateError> {
    let retries = parameters
        .get_u64(JOBSTORAGE_READ_RESILIENCE_RETRIES_MAX.id)
        .unwrap_or(3);
    let wait = parameters
        .get_u64(JOBSTORAGE_READ_RESILIENCE_RETRY_WAIT_SECONDS.id)
        .unwrap_or(2);

    ResilientActionExecutor::new().with_consultant(RetryWhen::new(
        DelegateError::is_transient,
        RetryProposal::fixed(u32::try_from(retries).unwrap_or(u32::MAX), Duration::from_secs(wait)),
    ))
}

fn metadata(job: &DelegateJob, product: &ProductSetup, timeout_minutes: u64) -> String {
    format!(
        "jobUUID={}\nsechubJobUUID={}\nproductId={}\nproductPath={}\ntimeoutMinutes={}\nstarted={}\n",
        job.uuid,
        job.sechub_job_uuid,
        product.id,
        product.path,
        timeout_minutes,
        job.started.unwrap_or_else(Utc::now).to_rfc3339()
    )
}

fn unreadable_result(uuid: Uuid, workspace: &JobWorkspace, cause: &DelegateError) -> String {
    warn!("Result file of job {} not readable: {}", uuid, cause);
    format!(
        "Result file could not be read at {}: {}",
        workspace.result_file().display(),
        cause
    )
}

/// Appends captured stdout and stderr to a failure text
async fn with_process_output(workspace: &JobWorkspace, mut text: String) -> String {
    if let Ok(Some(output)) = workspace.read_system_out().await {
        if !output.is_empty() {
            text.push_str("\nOutput:\n");
            text.push_str(&output);
        }
    }
    if let Ok(Some(errors)) = workspace.read_system_error().await {
        if !errors.is_empty() {
            text.push_str("\nErrors:\n");
            text.push_str(&errors);
        }
    }
    text
}

async fn log_script_output(uuid: Uuid, workspace: &JobWorkspace) {
    if let Ok(Some(output)) = workspace.read_system_out().await {
        info!("Script output of job {}:\n{}", uuid, output);
    }
    if let Ok(Some(errors)) = workspace.read_system_error().await {
        info!("Script errors of job {}:\n{}", uuid, errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessScript, ScriptedProcess};
    use crate::workspace::CANCEL_REQUESTED_EVENT_FILE;

    fn timings(timeout_ms: u64, grace_ms: u64) -> ExecutionTimings {
        ExecutionTimings {
            product_timeout: Duration::from_millis(timeout_ms),
            cancel_max_wait: Duration::from_millis(grace_ms),
            check_interval: Duration::from_millis(10),
        }
    }

    async fn workspace() -> (tempfile::TempDir, JobWorkspace) {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceService::new(dir.path()).create(Uuid::new_v4()).await.unwrap();
        (dir, ws)
    }

    fn process(ws: &JobWorkspace, script: ProcessScript) -> ScriptedProcess {
        ScriptedProcess::new(&script, Some(ws.events_folder().join(CANCEL_REQUESTED_EVENT_FILE)))
    }

    #[tokio::test]
    async fn test_monitor_reports_exit_code() {
        let (_dir, ws) = workspace().await;
        let mut p = process(&ws, ProcessScript::exiting(Duration::from_millis(20), 3));
        let (_tx, rx) = watch::channel(false);

        let result = monitor(&mut p, &timings(5_000, 0), &rx, &ws).await;

        assert_eq!(result, MonitorResult::Exited(3));
    }

    #[tokio::test]
    async fn test_monitor_times_out_and_destroys() {
        let (_dir, ws) = workspace().await;
        let mut p = process(&ws, ProcessScript::hanging());
        let (_tx, rx) = watch::channel(false);

        let started = Instant::now();
        let result = monitor(&mut p, &timings(50, 0), &rx, &ws).await;

        assert_eq!(result, MonitorResult::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(!p.is_alive());
    }

    #[tokio::test]
    async fn test_cancel_without_window_destroys_immediately() {
        let (_dir, ws) = workspace().await;
        let mut p = process(&ws, ProcessScript::hanging());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let started = Instant::now();
        let result = monitor(&mut p, &timings(60_000, 0), &rx, &ws).await;

        assert_eq!(result, MonitorResult::Canceled);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!p.is_alive());
        assert!(!ws.events_folder().join(CANCEL_REQUESTED_EVENT_FILE).exists());
    }

    #[tokio::test]
    async fn test_cooperative_cancel_within_window() {
        let (_dir, ws) = workspace().await;
        let script = ProcessScript::hanging().cooperative(Duration::from_millis(20));
        let mut p = process(&ws, script);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let started = Instant::now();
        let result = monitor(&mut p, &timings(60_000, 2_000), &rx, &ws).await;

        assert_eq!(result, MonitorResult::Canceled);
        assert!(ws.events_folder().join(CANCEL_REQUESTED_EVENT_FILE).exists());
        // ended by itself, not killed
        assert_eq!(p.exit_value(), 0);
        assert!(started.elapsed() < Duration::from_millis(2_000));
    }

    #[tokio::test]
    async fn test_cancel_window_elapses_then_destroys() {
        let (_dir, ws) = workspace().await;
        let mut p = process(&ws, ProcessScript::hanging());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let started = Instant::now();
        let result = monitor(&mut p, &timings(60_000, 100), &rx, &ws).await;

        assert_eq!(result, MonitorResult::Canceled);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(100 + 1_000));
        assert!(!p.is_alive());
        assert_eq!(p.exit_value(), 137);
    }

    #[tokio::test]
    async fn test_cancel_during_monitoring() {
        let (_dir, ws) = workspace().await;
        let mut p = process(&ws, ProcessScript::hanging());
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let _ = tx.send(true);
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let result = monitor(&mut p, &timings(60_000, 0), &rx, &ws).await;
        assert_eq!(result, MonitorResult::Canceled);
    }

    #[test]
    fn test_timings_fall_back_to_config() {
        let mut config = Config::default();
        config.cancel_max_wait = Duration::from_secs(7);
        config.check_interval = Duration::from_millis(250);

        let timings = ExecutionTimings::resolve(&ResolvedParameters::default(), 2, &config);

        assert_eq!(timings.product_timeout, Duration::from_secs(120));
        assert_eq!(timings.cancel_max_wait, Duration::from_secs(7));
        assert_eq!(timings.check_interval, Duration::from_millis(250));
    }
}
