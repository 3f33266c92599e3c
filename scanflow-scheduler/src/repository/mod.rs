//! Repository Module
//!
//! Storage traits of the scheduler domains with in-memory implementations.
//! Writes of versioned records are compare-and-swap on the version stamp.

pub mod job;
pub mod project;
pub mod result;
pub mod schedule;

pub use job::{InMemoryJobRecordStore, JobRecordStore};
pub use project::{InMemoryProjectStore, ProjectStore};
pub use result::{InMemoryProductResultStore, ProductResult, ProductResultStore};
pub use schedule::{InMemoryScheduleStore, ScheduleStore, ScheduledJob};
