//! Process supervision
//!
//! A [`ProcessSupervisor`] owns exactly one launched product process. The
//! execution engine only talks to the process through it. Every operation is
//! safe on a process that never started or has already exited:
//!
//! | operation          | not started | exited           |
//! |--------------------|-------------|------------------|
//! | `is_alive`         | `false`     | `false`          |
//! | `wait_for`         | `false`     | `true`           |
//! | `destroy_forcibly` | no-op       | no-op            |
//! | `exit_value`       | `-1`        | exit code or `-1`|

mod scripted;
mod system;

pub use scripted::{ProcessScript, ScriptedLauncher, ScriptedProcess};
pub use system::{SystemLauncher, SystemProcess};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Everything needed to launch a product process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Complete environment of the process, nothing else is inherited
    pub env: BTreeMap<String, String>,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,
}

/// Single owner of one OS process
#[async_trait]
pub trait ProcessSupervisor: Send {
    fn is_alive(&mut self) -> bool;

    /// Waits up to `timeout` for the process to exit
    ///
    /// Returns true when the process has exited.
    async fn wait_for(&mut self, timeout: Duration) -> bool;

    fn destroy_forcibly(&mut self);

    fn exit_value(&mut self) -> i32;
}

/// Starts product processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn start(&self, request: LaunchRequest) -> Result<Box<dyn ProcessSupervisor>>;
}

/// Stand-in for a process that was never started
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProcess;

#[async_trait]
impl ProcessSupervisor for NullProcess {
    fn is_alive(&mut self) -> bool {
        false
    }

    async fn wait_for(&mut self, _timeout: Duration) -> bool {
        false
    }

    fn destroy_forcibly(&mut self) {}

    fn exit_value(&mut self) -> i32 {
        -1
    }
}
