//! Remembered-verification expiry.

use gatehouse_common::SessionRecord;
use gatehouse_common::constants::SESSION_TTL_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub ttl_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvaluation {
    pub valid: bool,
    /// Flag and timestamp must be removed
    pub expire: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            ttl_ms: SESSION_TTL_MS,
        }
    }
}

impl SessionPolicy {
    pub fn new(ttl_ms: i64) -> Self {
        Self { ttl_ms }
    }

    pub fn evaluate(&self, record: &SessionRecord, now: i64) -> SessionEvaluation {
        match (record.verified, record.verified_at) {
            (true, Some(at)) if now - at < self.ttl_ms => SessionEvaluation {
                valid: true,
                expire: false,
            },
            (true, Some(_)) => SessionEvaluation {
                valid: false,
                expire: true,
            },
            _ => SessionEvaluation {
                valid: false,
                expire: false,
            },
        }
    }
}
