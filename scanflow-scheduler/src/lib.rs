//! Scanflow Scheduler
//!
//! Central scheduler of scan jobs. Owns job identity and lifecycle and runs
//! products on delegate servers through an adapter.
//!
//! This crate contains:
//! - Stores: active job records, project membership, scheduled jobs, product results
//! - Message bus connecting the administration, schedule, scan and notification domains
//! - Lifecycle entry points for cancel and soft or hard restart
//! - Delegate adapter with resilient retries

pub mod adapter;
pub mod bus;
pub mod config;
pub mod error;
pub mod node;
pub mod repository;
pub mod service;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::SchedulerError;
pub use node::{SchedulerNode, Stores};
