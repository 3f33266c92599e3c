//! In-memory process double
//!
//! Behaves like a launched product without touching the OS process table.
//! The script decides when the process exits, what it writes into the job
//! workspace at launch and whether it reacts to a cooperative cancel event.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::{LaunchRequest, ProcessLauncher, ProcessSupervisor};
use crate::error::{DelegateError, Result};
use crate::workspace::CANCEL_REQUESTED_EVENT_FILE;

/// Exit code reported after a forced kill
const KILLED_EXIT_CODE: i32 = 137;

/// Behaviour of a scripted process
#[derive(Debug, Clone, Default)]
pub struct ProcessScript {
    /// Lifetime of the process, `None` runs until killed
    pub exit_after: Option<Duration>,
    pub exit_code: i32,
    /// Written to the result file at launch
    pub result: Option<String>,
    /// Message files written at launch: (file name, text)
    pub messages: Vec<(String, String)>,
    /// Written to the stdout log at launch
    pub stdout: Option<String>,
    /// Exit this long after the cancel event shows up
    pub exits_on_cancel_event_after: Option<Duration>,
    pub fail_to_start: bool,
}

impl ProcessScript {
    /// Exits with `exit_code` after `delay`
    pub fn exiting(delay: Duration, exit_code: i32) -> Self {
        Self {
            exit_after: Some(delay),
            exit_code,
            ..Default::default()
        }
    }

    /// Never exits by itself
    pub fn hanging() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_message(mut self, file_name: impl Into<String>, text: impl Into<String>) -> Self {
        self.messages.push((file_name.into(), text.into()));
        self
    }

    pub fn with_stdout(mut self, output: impl Into<String>) -> Self {
        self.stdout = Some(output.into());
        self
    }

    pub fn cooperative(mut self, delay: Duration) -> Self {
        self.exits_on_cancel_event_after = Some(delay);
        self
    }
}

/// Launcher handing out [`ScriptedProcess`] instances
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    script: ProcessScript,
    launched: Mutex<Vec<LaunchRequest>>,
}

impl ScriptedLauncher {
    pub fn new(script: ProcessScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            launched: Mutex::new(Vec::new()),
        })
    }

    /// Requests received so far
    pub fn launched(&self) -> Vec<LaunchRequest> {
        self.launched.lock().map(|l| l.clone()).unwrap_or_default()
    }

    async fn write_outputs(&self, request: &LaunchRequest) -> Result<()> {
        if let Some(result) = &self.script.result {
            if let Some(file) = request.env.get("PDS_JOB_RESULT_FILE") {
                tokio::fs::write(file, result).await?;
            }
        }
        if let Some(folder) = request.env.get("PDS_JOB_USER_MESSAGES_FOLDER") {
            for (name, text) in &self.script.messages {
                tokio::fs::write(PathBuf::from(folder).join(name), text).await?;
            }
        }
        if let Some(output) = &self.script.stdout {
            tokio::fs::write(&request.stdout_file, output).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn start(&self, request: LaunchRequest) -> Result<Box<dyn ProcessSupervisor>> {
        if let Ok(mut launched) = self.launched.lock() {
            launched.push(request.clone());
        }
        if self.script.fail_to_start {
            return Err(DelegateError::Process(format!(
                "Scripted start failure for {}",
                request.program.display()
            )));
        }

        self.write_outputs(&request).await?;

        let cancel_event_file = request
            .env
            .get("PDS_JOB_EVENTS_FOLDER")
            .map(|folder| PathBuf::from(folder).join(CANCEL_REQUESTED_EVENT_FILE));

        Ok(Box::new(ScriptedProcess::new(&self.script, cancel_event_file)))
    }
}

/// A scripted process
#[derive(Debug)]
pub struct ScriptedProcess {
    exit_at: Option<Instant>,
    exit_code: i32,
    killed: bool,
    cancel_event_file: Option<PathBuf>,
    cooperative_delay: Option<Duration>,
}

impl ScriptedProcess {
    pub fn new(script: &ProcessScript, cancel_event_file: Option<PathBuf>) -> Self {
        Self {
            exit_at: script.exit_after.map(|delay| Instant::now() + delay),
            exit_code: script.exit_code,
            killed: false,
            cancel_event_file,
            cooperative_delay: script.exits_on_cancel_event_after,
        }
    }

    fn observe_cancel_event(&mut self) {
        let (Some(delay), Some(file)) = (self.cooperative_delay, &self.cancel_event_file) else {
            return;
        };
        if file.exists() {
            let exit = Instant::now() + delay;
            self.exit_at = Some(self.exit_at.map_or(exit, |current| current.min(exit)));
            self.cooperative_delay = None;
        }
    }
}

#[async_trait]
impl ProcessSupervisor for ScriptedProcess {
    fn is_alive(&mut self) -> bool {
        if self.killed {
            return false;
        }
        self.observe_cancel_event();
        self.exit_at.is_none_or(|exit| Instant::now() < exit)
    }

    async fn wait_for(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let step = (deadline - now).min(Duration::from_millis(5));
            tokio::time::sleep(step).await;
        }
    }

    fn destroy_forcibly(&mut self) {
        if self.is_alive() {
            self.killed = true;
            self.exit_code = KILLED_EXIT_CODE;
        }
    }

    fn exit_value(&mut self) -> i32 {
        if self.is_alive() { -1 } else { self.exit_code }
    }
}
