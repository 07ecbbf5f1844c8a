//! Attempt tracking.
//!
//! Failure counters with lazy-reset blocking, the log-volume burst
//! limiter, and the capped access logs they read from.

mod access_log;
mod limiter;

pub use access_log::AccessLogger;
pub use limiter::{AttemptLimiter, BurstLimiter};
