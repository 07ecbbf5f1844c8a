//! Shared constants for Gatehouse components.

/// Default Gatehouse HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8890";

/// Remembered verification lifetime (24 hours)
pub const SESSION_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Failed challenge submissions before the challenge path blocks
pub const CHALLENGE_MAX_FAILURES: u32 = 5;

/// Challenge path block window (15 minutes)
pub const CHALLENGE_BLOCK_MS: i64 = 15 * 60 * 1000;

/// Failed bypass passwords before the bypass path blocks
pub const BYPASS_MAX_FAILURES: u32 = 3;

/// Bypass path block window (30 minutes)
pub const BYPASS_BLOCK_MS: i64 = 30 * 60 * 1000;

/// Bypass log entries tolerated inside the burst window
pub const BYPASS_BURST_MAX_ENTRIES: usize = 10;

/// Trailing window the burst limiter counts over (5 minutes)
pub const BYPASS_BURST_WINDOW_MS: i64 = 5 * 60 * 1000;

/// General access log capacity
pub const ACCESS_LOG_CAP: usize = 100;

/// Bypass access log capacity
pub const BYPASS_LOG_CAP: usize = 50;

/// Cosmetic delay while a proof token is "verified" (ms)
pub const VERIFY_DELAY_MS: u64 = 1500;

/// How long the success state is shown before access is granted (ms)
pub const SUCCESS_HOLD_MS: u64 = 1000;

/// Error state auto-reverts to idle after this long (ms)
pub const ERROR_RESET_MS: u64 = 3000;

/// Bypass error message auto-clears after this long (ms)
pub const BYPASS_MESSAGE_RESET_MS: u64 = 5000;

/// Mounted gates kept in memory at once
pub const MAX_MOUNTED_GATES: usize = 10_000;

/// A mounted gate untouched for this long is unmounted (30 minutes)
pub const GATE_IDLE_MS: i64 = 30 * 60 * 1000;

/// How often idle gates are swept (seconds)
pub const GATE_SWEEP_INTERVAL_SECS: u64 = 60;

/// Namespace prefix for per-client keys: gate:{client_hash}:
pub const CLIENT_NAMESPACE_PREFIX: &str = "gate:";

/// Store keys, relative to a client namespace
pub mod keys {
    /// Remembered verification flag
    pub const VERIFIED: &str = "portfolio_verified";

    /// Remembered verification timestamp (ms since epoch)
    pub const VERIFIED_AT: &str = "portfolio_verified_time";

    /// Challenge path failure counter
    pub const CHALLENGE_FAILURES: &str = "failed_attempts";

    /// Challenge path last failure timestamp
    pub const CHALLENGE_LAST_FAILURE: &str = "last_failed_attempt";

    /// Bypass path failure counter
    pub const BYPASS_FAILURES: &str = "bypass_attempts";

    /// Bypass path last failure timestamp
    pub const BYPASS_LAST_FAILURE: &str = "bypass_last_attempt";

    /// General access log (JSON array)
    pub const ACCESS_LOG: &str = "access_logs";

    /// Bypass access log (JSON array)
    pub const BYPASS_LOG: &str = "bypass_access_logs";

    /// Bypass-origin session token
    pub const BYPASS_SESSION: &str = "bypass_session";

    /// Bypass-origin marker flag
    pub const BYPASS_ORIGIN: &str = "bypass_origin";

    /// Bypass-origin verified flag
    pub const BYPASS_VERIFIED: &str = "bypass_verified";
}

/// HTTP header names
pub mod headers {
    /// Browser client identity
    pub const X_CLIENT_ID: &str = "X-Client-Id";
}
