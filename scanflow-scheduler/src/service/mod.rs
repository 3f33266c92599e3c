//! Service Module
//!
//! Domain handlers of the scheduler and the lifecycle entry points.
//! Handlers talk to each other only through the message bus.

pub mod administration;
pub mod lifecycle;
pub mod notification;
pub mod scan;
pub mod schedule;

pub use administration::AdministrationHandler;
pub use lifecycle::JobLifecycleService;
pub use notification::{Notification, NotificationHandler};
pub use scan::ScanHandler;
pub use schedule::ScheduleHandler;

use scanflow_core::resilience::{ResilientActionExecutor, RetryProposal, RetryWhen};

use crate::config::Config;
use crate::error::SchedulerError;

pub const RESTART_CANCELED_NOT_FOUND: &str = "Restart canceled, because job not found!";
pub const RESTART_CANCELED_ALREADY_FINISHED: &str = "Restart canceled, because job already finished";

/// Attempts for version checked read-modify-write cycles
const UPDATE_ATTEMPTS: u32 = 5;

/// Executor for storage reads that may fail transiently
fn storage_executor(config: &Config) -> ResilientActionExecutor<SchedulerError> {
    ResilientActionExecutor::new().with_consultant(RetryWhen::new(
        SchedulerError::is_transient,
        RetryProposal::fixed(config.storage_read_retries, config.storage_read_wait),
    ))
}
