//! Error taxonomy for the access gate.

use thiserror::Error;

/// Errors surfaced by the gate subsystem
///
/// None of these reach the gated content; they are rendered as transient
/// gate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// Verification attempted without completing the challenge
    #[error("Please verify you are a human")]
    NoProofSubmitted,

    /// Blocking policy active
    #[error("Too many attempts. Try again in {remaining_minutes} minutes.")]
    RateLimited { remaining_minutes: u32 },

    /// Wrong bypass password
    #[error("Invalid password. {remaining_attempts} attempts remaining.")]
    InvalidCredential { remaining_attempts: u32 },

    /// Challenge site key is not configured
    #[error("Challenge site key missing")]
    MisconfiguredChallenge,

    /// Bypass path unavailable in this build
    #[error("Bypass access is disabled")]
    BypassDisabled,

    /// Backing store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GateError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoProofSubmitted => 400,
            Self::RateLimited { .. } => 429,
            Self::InvalidCredential { .. } => 401,
            Self::MisconfiguredChallenge => 500,
            Self::BypassDisabled => 404,
            Self::Store(_) => 503,
            Self::Config(_) => 500,
        }
    }

    /// Returns true if the user can retry right away
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoProofSubmitted | Self::InvalidCredential { .. } | Self::Store(_)
        )
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoProofSubmitted => "no_proof_submitted",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidCredential { .. } => "invalid_credential",
            Self::MisconfiguredChallenge => "misconfigured_challenge",
            Self::BypassDisabled => "bypass_disabled",
            Self::Store(_) => "store",
            Self::Config(_) => "config",
        }
    }
}
