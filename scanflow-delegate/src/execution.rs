//! Execution outcome types
//!
//! These types only exist at runtime while a product process is supervised.
//! They are folded into the delegate job record when the execution ends.

use chrono::Utc;

use scanflow_core::domain::delegate::{DelegateJob, DelegateJobState, UserMessage};

/// Result text stored when the product exceeds its timeout
pub const TIMEOUT_RESULT: &str = "Product time out.";

/// Exit code reported for timed out executions
pub const TIMEOUT_EXIT_CODE: i32 = 1;

/// How the monitoring loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorResult {
    Exited(i32),
    TimedOut,
    Canceled,
}

/// Final outcome of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success {
        result: String,
        messages: Vec<UserMessage>,
    },
    Failure {
        exit_code: i32,
        result: String,
        messages: Vec<UserMessage>,
    },
    Timeout {
        messages: Vec<UserMessage>,
    },
    /// Canceled on request, exit code and result are discarded
    Canceled {
        messages: Vec<UserMessage>,
    },
}

impl ExecutionOutcome {
    pub fn state(&self) -> DelegateJobState {
        match self {
            ExecutionOutcome::Success { .. } => DelegateJobState::Done,
            ExecutionOutcome::Failure { .. } | ExecutionOutcome::Timeout { .. } => {
                DelegateJobState::Failed
            }
            ExecutionOutcome::Canceled { .. } => DelegateJobState::Canceled,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionOutcome::Success { .. } => Some(0),
            ExecutionOutcome::Failure { exit_code, .. } => Some(*exit_code),
            ExecutionOutcome::Timeout { .. } => Some(TIMEOUT_EXIT_CODE),
            ExecutionOutcome::Canceled { .. } => None,
        }
    }

    pub fn result(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Success { result, .. } | ExecutionOutcome::Failure { result, .. } => {
                Some(result)
            }
            ExecutionOutcome::Timeout { .. } => Some(TIMEOUT_RESULT),
            ExecutionOutcome::Canceled { .. } => None,
        }
    }

    pub fn messages(&self) -> &[UserMessage] {
        match self {
            ExecutionOutcome::Success { messages, .. }
            | ExecutionOutcome::Failure { messages, .. }
            | ExecutionOutcome::Timeout { messages }
            | ExecutionOutcome::Canceled { messages } => messages,
        }
    }

    /// Writes the outcome into a job record
    pub fn apply_to(&self, job: &mut DelegateJob) {
        job.state = self.state();
        job.exit_code = self.exit_code();
        job.result = self.result().map(str::to_string);
        job.messages = self.messages().to_vec();
        job.ended = Some(Utc::now());
    }
}
