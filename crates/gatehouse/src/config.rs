//! Configuration management for Gatehouse.

use anyhow::{Context, Result};
use gatehouse_common::constants::{
    BYPASS_BLOCK_MS, BYPASS_BURST_MAX_ENTRIES, BYPASS_BURST_WINDOW_MS, BYPASS_MAX_FAILURES,
    BYPASS_MESSAGE_RESET_MS, CHALLENGE_BLOCK_MS, CHALLENGE_MAX_FAILURES, DEFAULT_LISTEN_ADDR,
    ERROR_RESET_MS, GATE_IDLE_MS, MAX_MOUNTED_GATES, SESSION_TTL_MS, SUCCESS_HOLD_MS, VERIFY_DELAY_MS,
};
use gatehouse_common::{BuildMode, GateError};
use serde::Deserialize;
use std::time::Duration;

use crate::policy::{BlockPolicy, BurstPolicy, SessionPolicy};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL; in-memory store when unset
    #[serde(default)]
    pub redis_url: Option<String>,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Controls bypass visibility only
    #[serde(default)]
    pub build_mode: BuildMode,

    /// Remembered verification lifetime in seconds
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Upper bound on gates mounted at once
    #[serde(default = "default_max_mounted_gates")]
    pub max_mounted_gates: usize,

    /// Unmount gates idle for longer than this
    #[serde(default = "default_gate_idle")]
    pub gate_idle_secs: u64,

    /// Challenge widget and flow
    #[serde(default)]
    pub challenge: ChallengeConfig,

    /// Password bypass
    #[serde(default)]
    pub bypass: BypassConfig,
}

/// Challenge-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeConfig {
    /// Public site key of the puzzle widget
    #[serde(default)]
    pub site_key: Option<String>,

    #[serde(default = "default_verify_delay")]
    pub verify_delay_ms: u64,

    #[serde(default = "default_success_hold")]
    pub success_hold_ms: u64,

    #[serde(default = "default_error_reset")]
    pub error_reset_ms: u64,

    /// Failures before the challenge path blocks
    #[serde(default = "default_challenge_max_failures")]
    pub max_failures: u32,

    /// Block length in seconds
    #[serde(default = "default_challenge_block")]
    pub block_secs: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            site_key: None,
            verify_delay_ms: default_verify_delay(),
            success_hold_ms: default_success_hold(),
            error_reset_ms: default_error_reset(),
            max_failures: default_challenge_max_failures(),
            block_secs: default_challenge_block(),
        }
    }
}

impl ChallengeConfig {
    pub fn block_policy(&self) -> BlockPolicy {
        BlockPolicy::new(self.max_failures, secs_to_ms(self.block_secs))
    }
}

/// Bypass-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BypassConfig {
    /// Bypass password; bypass is disabled when unset
    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default = "default_message_reset")]
    pub message_reset_ms: u64,

    #[serde(default = "default_bypass_max_failures")]
    pub max_failures: u32,

    #[serde(default = "default_bypass_block")]
    pub block_secs: u64,

    /// Bypass log entries tolerated inside the burst window
    #[serde(default = "default_burst_max_entries")]
    pub burst_max_entries: usize,

    #[serde(default = "default_burst_window")]
    pub burst_window_secs: u64,
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self {
            secret: None,
            message_reset_ms: default_message_reset(),
            max_failures: default_bypass_max_failures(),
            block_secs: default_bypass_block(),
            burst_max_entries: default_burst_max_entries(),
            burst_window_secs: default_burst_window(),
        }
    }
}

impl BypassConfig {
    pub fn block_policy(&self) -> BlockPolicy {
        BlockPolicy::new(self.max_failures, secs_to_ms(self.block_secs))
    }

    pub fn burst_policy(&self) -> BurstPolicy {
        BurstPolicy {
            max_entries: self.burst_max_entries,
            window_ms: secs_to_ms(self.burst_window_secs),
        }
    }

    pub fn message_reset(&self) -> Duration {
        Duration::from_millis(self.message_reset_ms)
    }
}

// Default value functions
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_session_ttl() -> u64 { (SESSION_TTL_MS / 1000) as u64 } // 24 hours
fn default_max_mounted_gates() -> usize { MAX_MOUNTED_GATES }
fn default_gate_idle() -> u64 { (GATE_IDLE_MS / 1000) as u64 } // 30 minutes
fn default_verify_delay() -> u64 { VERIFY_DELAY_MS }
fn default_success_hold() -> u64 { SUCCESS_HOLD_MS }
fn default_error_reset() -> u64 { ERROR_RESET_MS }
fn default_challenge_max_failures() -> u32 { CHALLENGE_MAX_FAILURES }
fn default_challenge_block() -> u64 { (CHALLENGE_BLOCK_MS / 1000) as u64 } // 15 minutes
fn default_message_reset() -> u64 { BYPASS_MESSAGE_RESET_MS }
fn default_bypass_max_failures() -> u32 { BYPASS_MAX_FAILURES }
fn default_bypass_block() -> u64 { (BYPASS_BLOCK_MS / 1000) as u64 } // 30 minutes
fn default_burst_max_entries() -> usize { BYPASS_BURST_MAX_ENTRIES }
fn default_burst_window() -> u64 { (BYPASS_BURST_WINDOW_MS / 1000) as u64 } // 5 minutes

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

impl AppConfig {
    /// Load configuration from file and `GATEHOUSE__*` env, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("GATEHOUSE").separator("__"))
            .build()
            .context("Failed to load config")?;

        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to parse config")?;

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = Some(redis_url.clone());
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the gate unusable
    pub fn validate(&self) -> Result<(), GateError> {
        if self.session_ttl_secs == 0 {
            return Err(GateError::Config("session_ttl_secs must be positive".into()));
        }
        if self.max_mounted_gates == 0 {
            return Err(GateError::Config("max_mounted_gates must be positive".into()));
        }
        if self.challenge.max_failures == 0 || self.bypass.max_failures == 0 {
            return Err(GateError::Config("max_failures must be positive".into()));
        }
        if self.build_mode.is_production() && self.bypass.secret.is_some() {
            tracing::warn!("Bypass secret set in a production build; bypass stays disabled");
        }
        Ok(())
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy::new(secs_to_ms(self.session_ttl_secs))
    }

    pub fn gate_idle_ms(&self) -> i64 {
        secs_to_ms(self.gate_idle_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            listen_addr: default_listen_addr(),
            build_mode: BuildMode::default(),
            session_ttl_secs: default_session_ttl(),
            max_mounted_gates: default_max_mounted_gates(),
            gate_idle_secs: default_gate_idle(),
            challenge: ChallengeConfig::default(),
            bypass: BypassConfig::default(),
        }
    }
}
