//! Scanflow Delegate
//!
//! Execution server for scan products. A delegate job is created with its
//! parameters, receives uploads, is marked ready to start and is then run
//! as one supervised OS process per job.
//!
//! Architecture:
//! - Configuration: settings from environment or defaults
//! - Repository: delegate job records with optimistic versioning
//! - Workspace: per-job folder tree and launcher environment
//! - Process: supervisor abstraction over launched products
//! - Services: job facade and execution engine

pub mod config;
pub mod environment;
pub mod error;
pub mod execution;
pub mod process;
pub mod repository;
pub mod service;
pub mod workspace;

pub use config::Config;
pub use error::DelegateError;
pub use service::DelegateJobService;
