//! Scanflow Core
//!
//! Shared types and building blocks for the scanflow scheduler and delegate servers.
//!
//! This crate contains:
//! - Domain types: job records, delegate jobs, bus messages
//! - Parameter catalog: typed configuration keys and their resolution
//! - Product setup: delegate product definitions and load-time auto-fix
//! - Timeout resolution for product executions
//! - Resilience: retry wrapper driven by consultants

pub mod domain;
pub mod error;
pub mod parameter;
pub mod product;
pub mod resilience;
pub mod timeout;

pub use error::CoreError;
