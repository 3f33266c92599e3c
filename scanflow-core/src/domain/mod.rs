//! Core domain types
//!
//! This module contains the domain structures shared between the scheduler
//! (job records, bus messages) and the delegate server (delegate jobs).

pub mod delegate;
pub mod job;
pub mod message;
