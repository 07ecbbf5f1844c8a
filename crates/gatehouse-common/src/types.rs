//! Core types shared across Gatehouse components.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Build flavour
///
/// Controls visibility of the bypass path only. It is a UX convenience,
/// not a security boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Production,
    Development,
}

impl BuildMode {
    /// Build mode implied by the compilation profile
    pub fn from_profile() -> Self {
        if cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Production
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl Default for BuildMode {
    fn default() -> Self {
        Self::from_profile()
    }
}

/// Root colour scheme the challenge widget follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Default for Theme {
    fn default() -> Self {
        Self::Light
    }
}

/// Which path produced an access log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMethod {
    Challenge,
    Bypass,
}

/// Outcome recorded in an access log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOutcome {
    Success,
    Failure,
    Blocked,
}

/// One access log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Milliseconds since epoch
    pub timestamp: i64,

    #[serde(rename = "type")]
    pub outcome: AccessOutcome,

    pub method: AccessMethod,

    /// Contextual fields (user agent, page URL, session token, attempts)
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl AccessLogEntry {
    pub fn new(timestamp: i64, outcome: AccessOutcome, method: AccessMethod) -> Self {
        Self {
            timestamp,
            outcome,
            method,
            context: Map::new(),
        }
    }

    /// Attach a context field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// Remembered verification as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionRecord {
    pub verified: bool,
    pub verified_at: Option<i64>,
}

/// Failure counter as stored (both paths share the shape)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FailureCounter {
    pub count: u32,
    pub last_attempt_at: Option<i64>,
}

/// Result of a block check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStatus {
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_minutes: Option<u32>,
}

impl BlockStatus {
    pub const CLEAR: BlockStatus = BlockStatus {
        blocked: false,
        remaining_minutes: None,
    };

    pub fn blocked(remaining_minutes: u32) -> Self {
        Self {
            blocked: true,
            remaining_minutes: Some(remaining_minutes),
        }
    }
}

/// Challenge flow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ChallengePhase {
    /// Waiting for the user to submit
    Idle,
    /// Proof submitted, cosmetic verification running
    Verifying,
    /// Verified; access about to be granted
    Success,
    /// Last submission had no proof; reverts to idle on its own
    Error,
    /// Too many failures
    Blocked { remaining_minutes: u32 },
}

impl ChallengePhase {
    /// Whether the submit control accepts input
    pub fn accepts_submission(&self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }
}

/// Summary over the general access log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessStats {
    pub total_attempts: usize,
    pub today_attempts: usize,
    pub successful_access: usize,
    pub failed_attempts: usize,
    pub blocked_attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_access: Option<chrono::DateTime<chrono::Utc>>,
}
