//! Operation execution
//!
//! This module handles:
//! - Lazy connection establishment and connect coalescing
//! - Retrying remote operations per the configured backoff policy
//! - Request and connection statistics

mod operation;
mod stats;

pub use operation::OperationExecutor;
pub use stats::{OperationStats, StatsSnapshot};
