//! Scheduler configuration

use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Retries for job storage reads
    pub storage_read_retries: u32,
    pub storage_read_wait: Duration,

    /// Retries for transient delegate failures
    pub adapter_retries: u32,
    pub adapter_retry_wait: Duration,

    /// Interval between two delegate status polls
    pub scan_poll_interval: Duration,

    /// A scan still running after this is canceled and failed
    pub scan_max_duration: Duration,
}

impl Config {
    pub fn new() -> Self {
        Self {
            storage_read_retries: 3,
            storage_read_wait: Duration::from_secs(2),
            adapter_retries: 3,
            adapter_retry_wait: Duration::from_secs(1),
            scan_poll_interval: Duration::from_secs(1),
            scan_max_duration: Duration::from_secs(4 * 24 * 60 * 60),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - SCHEDULER_STORAGE_READ_RETRIES (optional, default: 3)
    /// - SCHEDULER_STORAGE_READ_WAIT_MS (optional, default: 2000)
    /// - SCHEDULER_ADAPTER_RETRIES (optional, default: 3)
    /// - SCHEDULER_ADAPTER_RETRY_WAIT_MS (optional, default: 1000)
    /// - SCHEDULER_SCAN_POLL_INTERVAL_MS (optional, default: 1000)
    /// - SCHEDULER_SCAN_MAX_DURATION_MINUTES (optional, default: 5760)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            storage_read_retries: env_parse("SCHEDULER_STORAGE_READ_RETRIES")?
                .unwrap_or(defaults.storage_read_retries),
            storage_read_wait: env_parse("SCHEDULER_STORAGE_READ_WAIT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.storage_read_wait),
            adapter_retries: env_parse("SCHEDULER_ADAPTER_RETRIES")?.unwrap_or(defaults.adapter_retries),
            adapter_retry_wait: env_parse("SCHEDULER_ADAPTER_RETRY_WAIT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.adapter_retry_wait),
            scan_poll_interval: env_parse("SCHEDULER_SCAN_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.scan_poll_interval),
            scan_max_duration: env_parse::<u64>("SCHEDULER_SCAN_MAX_DURATION_MINUTES")?
                .map(|minutes| Duration::from_secs(minutes * 60))
                .unwrap_or(defaults.scan_max_duration),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scan_poll_interval.is_zero() {
            anyhow::bail!("scan_poll_interval must be greater than 0");
        }
        if self.scan_max_duration < self.scan_poll_interval {
            anyhow::bail!(
                "scan_max_duration ({:?}) must not be shorter than scan_poll_interval ({:?})",
                self.scan_max_duration,
                self.scan_poll_interval
            );
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.storage_read_retries, 3);
        assert_eq!(config.scan_max_duration, Duration::from_secs(5760 * 60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.scan_poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config.scan_poll_interval = Duration::from_secs(10);
        config.scan_max_duration = Duration::from_secs(5);
        assert!(config.validate().is_err());
    }
}
