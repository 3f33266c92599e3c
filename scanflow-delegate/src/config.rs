//! Delegate server configuration
//!
//! Defines all configurable parameters for the delegate server including
//! workspace location, product timeout limits, cancel timing and queue sizes.

use std::path::PathBuf;
use std::time::Duration;

use scanflow_core::timeout::TimeoutLimits;

/// Delegate server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this server instance
    pub server_id: String,

    /// Root folder holding one workspace per delegate job
    pub workspace_root: PathBuf,

    /// Product setup JSON file, no products are available without it
    pub product_setup_file: Option<PathBuf>,

    pub min_timeout_minutes: u64,
    pub max_timeout_minutes: u64,
    pub default_timeout_minutes: u64,

    /// Time a canceled process gets to end by itself, zero kills immediately
    pub cancel_max_wait: Duration,

    /// Liveness check interval while monitoring or canceling a process
    pub check_interval: Duration,

    /// Maximum number of jobs that are ready or running
    pub queue_max: usize,

    /// Maximum number of concurrently running processes
    pub worker_threads: usize,

    /// Delete job workspaces after execution
    pub auto_clean_workspace: bool,

    /// Variables of the server environment passed on to launched processes
    pub script_env_whitelist: Vec<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(server_id: String, workspace_root: PathBuf) -> Self {
        Self {
            server_id,
            workspace_root,
            product_setup_file: None,
            min_timeout_minutes: 1,
            max_timeout_minutes: 4 * 24 * 60,
            default_timeout_minutes: 120,
            cancel_max_wait: Duration::ZERO,
            check_interval: Duration::from_millis(1000),
            queue_max: 50,
            worker_threads: 5,
            auto_clean_workspace: true,
            script_env_whitelist: default_whitelist(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DELEGATE_SERVER_ID (optional, default: random UUID)
    /// - DELEGATE_WORKSPACE_ROOT (optional, default: ./workspace)
    /// - DELEGATE_PRODUCT_SETUP_FILE (optional)
    /// - DELEGATE_MIN_TIMEOUT_MINUTES (optional, default: 1)
    /// - DELEGATE_MAX_TIMEOUT_MINUTES (optional, default: 5760)
    /// - DELEGATE_DEFAULT_TIMEOUT_MINUTES (optional, default: 120)
    /// - DELEGATE_CANCEL_MAX_WAIT_SECONDS (optional, default: 0)
    /// - DELEGATE_CANCEL_CHECK_INTERVAL_MS (optional, default: 1000)
    /// - DELEGATE_QUEUE_MAX (optional, default: 50)
    /// - DELEGATE_WORKER_THREADS (optional, default: 5)
    /// - DELEGATE_AUTO_CLEAN_WORKSPACE (optional, default: true)
    /// - DELEGATE_SCRIPT_ENV_WHITELIST (optional, comma separated)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let server_id = std::env::var("DELEGATE_SERVER_ID").unwrap_or(defaults.server_id);

        let workspace_root = std::env::var("DELEGATE_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_root);

        let product_setup_file = std::env::var("DELEGATE_PRODUCT_SETUP_FILE")
            .ok()
            .map(PathBuf::from);

        let cancel_max_wait = env_parse::<u64>("DELEGATE_CANCEL_MAX_WAIT_SECONDS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.cancel_max_wait);

        let check_interval = env_parse::<u64>("DELEGATE_CANCEL_CHECK_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.check_interval);

        let auto_clean_workspace = env_parse::<bool>("DELEGATE_AUTO_CLEAN_WORKSPACE")?
            .unwrap_or(defaults.auto_clean_workspace);

        let script_env_whitelist = std::env::var("DELEGATE_SCRIPT_ENV_WHITELIST")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.script_env_whitelist);

        Ok(Self {
            server_id,
            workspace_root,
            product_setup_file,
            min_timeout_minutes: env_parse("DELEGATE_MIN_TIMEOUT_MINUTES")?
                .unwrap_or(defaults.min_timeout_minutes),
            max_timeout_minutes: env_parse("DELEGATE_MAX_TIMEOUT_MINUTES")?
                .unwrap_or(defaults.max_timeout_minutes),
            default_timeout_minutes: env_parse("DELEGATE_DEFAULT_TIMEOUT_MINUTES")?
                .unwrap_or(defaults.default_timeout_minutes),
            cancel_max_wait,
            check_interval,
            queue_max: env_parse("DELEGATE_QUEUE_MAX")?.unwrap_or(defaults.queue_max),
            worker_threads: env_parse("DELEGATE_WORKER_THREADS")?.unwrap_or(defaults.worker_threads),
            auto_clean_workspace,
            script_env_whitelist,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_id.is_empty() {
            anyhow::bail!("server_id cannot be empty");
        }

        if self.min_timeout_minutes == 0 {
            anyhow::bail!("min_timeout_minutes must be at least 1");
        }

        if self.min_timeout_minutes > self.max_timeout_minutes {
            anyhow::bail!(
                "min_timeout_minutes ({}) must not exceed max_timeout_minutes ({})",
                self.min_timeout_minutes,
                self.max_timeout_minutes
            );
        }

        if self.check_interval.is_zero() {
            anyhow::bail!("check_interval must be greater than 0");
        }

        if self.worker_threads == 0 {
            anyhow::bail!("worker_threads must be greater than 0");
        }

        if self.queue_max < self.worker_threads {
            anyhow::bail!(
                "queue_max ({}) must be at least worker_threads ({})",
                self.queue_max,
                self.worker_threads
            );
        }

        Ok(())
    }

    pub fn timeout_limits(&self) -> TimeoutLimits {
        TimeoutLimits {
            min_minutes: self.min_timeout_minutes,
            max_minutes: self.max_timeout_minutes,
            default_minutes: self.default_timeout_minutes,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), PathBuf::from("./workspace"))
    }
}

fn default_whitelist() -> Vec<String> {
    ["PATH", "HOME", "LANG", "TMPDIR"].iter().map(|s| s.to_string()).collect()
}

/// Reads an optional variable, failing on values that do not parse
fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has invalid value {:?}: {}", name, raw, e)),
        Err(_) => Ok(None),
    }
}
