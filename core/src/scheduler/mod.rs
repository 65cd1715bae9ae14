//! Durable clearing jobs
//!
//! One job per intent, fired once at the auction deadline.

pub mod daemon;
pub mod model;


pub use daemon::{ClearingScheduler, ReconcileReport};
pub use model::{ClearingJob, JobState};
