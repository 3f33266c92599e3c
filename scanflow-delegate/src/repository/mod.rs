//! Repository layer
//!
//! Repositories hold the delegate job records. Every write is checked
//! against the version stamp of the stored record, so a lost update is
//! reported instead of silently overwriting a concurrent change.
//!
//! All repositories are trait-based so the storage technology can be replaced.

mod jobs;

// Re-export traits
pub use jobs::JobRepository;

// Re-export implementations
pub use jobs::InMemoryJobRepository;
