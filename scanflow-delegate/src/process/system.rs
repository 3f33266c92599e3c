//! OS process supervision on top of `tokio::process`

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{LaunchRequest, ProcessLauncher, ProcessSupervisor};
use crate::error::{DelegateError, Result};

/// Launches product executables as OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn start(&self, request: LaunchRequest) -> Result<Box<dyn ProcessSupervisor>> {
        let stdout = std::fs::File::create(&request.stdout_file)?;
        let stderr = std::fs::File::create(&request.stderr_file)?;

        let child = Command::new(&request.program)
            .args(&request.args)
            .current_dir(&request.working_dir)
            .env_clear()
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DelegateError::Process(format!("Failed to start {}: {}", request.program.display(), e))
            })?;

        debug!("Started {} with pid {:?}", request.program.display(), child.id());

        Ok(Box::new(SystemProcess::new(child)))
    }
}

/// A launched OS process
pub struct SystemProcess {
    child: Child,
    status: Option<ExitStatus>,
}

impl SystemProcess {
    pub fn new(child: Child) -> Self {
        Self { child, status: None }
    }

    fn poll_exit(&mut self) {
        if self.status.is_some() {
            return;
        }
        match self.child.try_wait() {
            Ok(status) => self.status = status,
            Err(e) => warn!("Failed to poll process {:?}: {}", self.child.id(), e),
        }
    }
}

#[async_trait]
impl ProcessSupervisor for SystemProcess {
    fn is_alive(&mut self) -> bool {
        self.poll_exit();
        self.status.is_none()
    }

    async fn wait_for(&mut self, timeout: Duration) -> bool {
        if self.status.is_some() {
            return true;
        }
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.status = Some(status);
                true
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for process {:?}: {}", self.child.id(), e);
                false
            }
            Err(_) => false,
        }
    }

    fn destroy_forcibly(&mut self) {
        if !self.is_alive() {
            return;
        }
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to kill process {:?}: {}", self.child.id(), e);
        }
    }

    fn exit_value(&mut self) -> i32 {
        self.poll_exit();
        self.status.and_then(|status| status.code()).unwrap_or(-1)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request(dir: &std::path::Path, script: &str) -> LaunchRequest {
        let mut env = BTreeMap::new();
        env.insert("GREETING".to_string(), "hello".to_string());
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        LaunchRequest {
            program: "/bin/sh".into(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: dir.to_path_buf(),
            env,
            stdout_file: dir.join("system-out.log"),
            stderr_file: dir.join("system-error.log"),
        }
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_process_exit_code_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = SystemLauncher
            .start(request(dir.path(), "echo $GREETING\necho oops >&2\nexit 3"))
            .await
            .unwrap();

        assert!(process.wait_for(Duration::from_secs(10)).await);
        assert!(!process.is_alive());
        assert_eq!(process.exit_value(), 3);
        assert!(process.wait_for(Duration::from_millis(1)).await);

        let out = std::fs::read_to_string(dir.path().join("system-out.log")).unwrap();
        let err = std::fs::read_to_string(dir.path().join("system-error.log")).unwrap();
        assert_eq!(out.trim(), "hello");
        assert_eq!(err.trim(), "oops");
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_environment_is_not_inherited() {
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: test sets a variable only it reads
        unsafe { std::env::set_var("SCANFLOW_LEAK_CHECK", "leaked") };
        let mut process = SystemLauncher
            .start(request(dir.path(), "echo \"[$SCANFLOW_LEAK_CHECK]\""))
            .await
            .unwrap();

        assert!(process.wait_for(Duration::from_secs(10)).await);
        let out = std::fs::read_to_string(dir.path().join("system-out.log")).unwrap();
        assert_eq!(out.trim(), "[]");
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_destroy_forcibly() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = SystemLauncher.start(request(dir.path(), "sleep 30")).await.unwrap();

        assert!(process.is_alive());
        assert!(!process.wait_for(Duration::from_millis(50)).await);
        assert_eq!(process.exit_value(), -1);

        process.destroy_forcibly();
        assert!(process.wait_for(Duration::from_secs(5)).await);
        assert!(!process.is_alive());
        assert_eq!(process.exit_value(), -1);

        // already exited
        process.destroy_forcibly();
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path(), "true");
        req.program = dir.path().join("missing.sh");
        req.args.clear();

        let result = SystemLauncher.start(req).await;
        assert!(matches!(result, Err(DelegateError::Process(_))));
    }
}
