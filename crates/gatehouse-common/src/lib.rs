//! # Gatehouse Common
//!
//! Shared types, errors, and constants used across Gatehouse components.
//!
//! ## Modules
//! - `types` - Core data structures (ChallengePhase, AccessLogEntry, etc.)
//! - `error` - Gate error taxonomy
//! - `constants` - Thresholds, windows, and store key names

pub mod constants;
pub mod error;
pub mod types;

pub use error::GateError;
pub use types::*;
