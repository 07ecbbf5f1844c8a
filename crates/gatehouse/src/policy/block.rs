//! Failure-count and burst blocking rules.

use gatehouse_common::constants::{
    BYPASS_BLOCK_MS, BYPASS_BURST_MAX_ENTRIES, BYPASS_BURST_WINDOW_MS, BYPASS_MAX_FAILURES,
    CHALLENGE_BLOCK_MS, CHALLENGE_MAX_FAILURES,
};
use gatehouse_common::{AccessLogEntry, BlockStatus, FailureCounter};

use super::ceil_minutes;

/// Threshold + window over a failure counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPolicy {
    /// Failures at which the block engages
    pub threshold: u32,
    /// Block length measured from the last failure (ms)
    pub window_ms: i64,
}

/// Decision plus the mutation to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEvaluation {
    pub status: BlockStatus,
    /// Counter and timestamp must be cleared
    pub reset: bool,
}

impl BlockPolicy {
    pub const CHALLENGE: BlockPolicy = BlockPolicy {
        threshold: CHALLENGE_MAX_FAILURES,
        window_ms: CHALLENGE_BLOCK_MS,
    };

    pub const BYPASS: BlockPolicy = BlockPolicy {
        threshold: BYPASS_MAX_FAILURES,
        window_ms: BYPASS_BLOCK_MS,
    };

    pub fn new(threshold: u32, window_ms: i64) -> Self {
        Self {
            threshold,
            window_ms,
        }
    }

    pub fn evaluate(&self, counter: &FailureCounter, now: i64) -> BlockEvaluation {
        let last = match counter.last_attempt_at {
            Some(last) if counter.count >= self.threshold => last,
            _ => {
                return BlockEvaluation {
                    status: BlockStatus::CLEAR,
                    reset: false,
                };
            }
        };

        // A timestamp from the future counts as "just now"
        let elapsed = (now - last).max(0);

        if elapsed < self.window_ms {
            BlockEvaluation {
                status: BlockStatus::blocked(ceil_minutes(self.window_ms - elapsed)),
                reset: false,
            }
        } else {
            BlockEvaluation {
                status: BlockStatus::CLEAR,
                reset: true,
            }
        }
    }

    /// Attempts left before the block engages
    pub fn remaining_attempts(&self, failures: u32) -> u32 {
        self.threshold.saturating_sub(failures)
    }
}

/// Volume limiter over a trailing window of log entries
///
/// Counts successes and failures alike. Unlike `BlockPolicy` it has no
/// state of its own to reset: entries simply age out of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstPolicy {
    /// Entries tolerated inside the window
    pub max_entries: usize,
    /// Trailing window (ms)
    pub window_ms: i64,
}

impl BurstPolicy {
    pub const BYPASS: BurstPolicy = BurstPolicy {
        max_entries: BYPASS_BURST_MAX_ENTRIES,
        window_ms: BYPASS_BURST_WINDOW_MS,
    };

    pub fn evaluate(&self, entries: &[AccessLogEntry], now: i64) -> BlockStatus {
        let recent = entries
            .iter()
            .filter(|e| now - e.timestamp < self.window_ms)
            .count();

        if recent > self.max_entries {
            BlockStatus::blocked(ceil_minutes(self.window_ms))
        } else {
            BlockStatus::CLEAR
        }
    }
}
