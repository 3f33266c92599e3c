//! Service layer
//!
//! Services contain the business logic of the delegate server. The job
//! service is the facade callers talk to, the execution engine runs one job
//! from READY_TO_START to its final state.

mod execution;
mod jobs;

pub use execution::{ExecutionEngine, ExecutionTimings, monitor, terminate};
pub use jobs::DelegateJobService;
