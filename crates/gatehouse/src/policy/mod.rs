//! Pure gate policies.
//!
//! Every policy takes the stored record plus `now` and returns both the
//! decision and the state mutation the caller must apply. Nothing here
//! touches the store, so the lazy expiry/reset rules are testable with
//! plain timestamps.

mod block;
mod session;

pub use block::{BlockPolicy, BurstPolicy};
pub use session::SessionPolicy;

const MINUTE_MS: i64 = 60 * 1000;

/// Whole minutes left, rounded up
pub(crate) fn ceil_minutes(ms: i64) -> u32 {
    let ms = ms.max(0);
    ((ms + MINUTE_MS - 1) / MINUTE_MS) as u32
}
