//! Access logging and statistics.

use chrono::{DateTime, Utc};
use gatehouse_common::{
    AccessLogEntry, AccessMethod, AccessOutcome, AccessStats, BuildMode, GateError,
};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::clock::Clock;
use crate::store::{GateRepository, LogStream, store_error};

/// Appends to the general and bypass access logs
///
/// Log writes never fail a verification: a store error is traced and the
/// flow continues.
#[derive(Clone)]
pub struct AccessLogger {
    repo: GateRepository,
    clock: Arc<dyn Clock>,
    build_mode: BuildMode,
    /// Request context stamped onto every entry
    context: Map<String, Value>,
}

impl AccessLogger {
    pub fn new(
        repo: GateRepository,
        clock: Arc<dyn Clock>,
        build_mode: BuildMode,
        context: Map<String, Value>,
    ) -> Self {
        Self {
            repo,
            clock,
            build_mode,
            context,
        }
    }

    /// Same logger, stamping `context` instead
    pub fn with_context(&self, context: Map<String, Value>) -> Self {
        Self {
            context,
            ..self.clone()
        }
    }

    pub async fn record(&self, outcome: AccessOutcome, method: AccessMethod) {
        let mut entry = AccessLogEntry::new(self.clock.now_ms(), outcome, method);
        entry.context = self.context.clone();

        tracing::debug!(outcome = ?outcome, method = ?method, "🔒 Access log");

        if let Err(e) = self.repo.append_log(LogStream::General, entry).await {
            tracing::warn!(error = %e, "Failed to append access log");
        }
    }

    /// Bypass-specific entry with its own context fields
    pub async fn record_bypass(&self, success: bool, extra: Map<String, Value>) {
        let outcome = if success {
            AccessOutcome::Success
        } else {
            AccessOutcome::Failure
        };

        let mut entry = AccessLogEntry::new(self.clock.now_ms(), outcome, AccessMethod::Bypass)
            .with("success", success)
            .with("build_mode", serde_json::to_value(self.build_mode).unwrap_or(Value::Null));
        entry.context.extend(self.context.clone());
        entry.context.extend(extra);

        if success {
            tracing::info!("🔓 Bypass access granted");
        } else {
            tracing::info!("🔒 Bypass access denied");
        }

        if let Err(e) = self.repo.append_log(LogStream::Bypass, entry).await {
            tracing::warn!(error = %e, "Failed to append bypass log");
        }
    }

    /// Summary over the general log
    pub async fn stats(&self) -> Result<AccessStats, GateError> {
        let entries = self
            .repo
            .log(LogStream::General)
            .await
            .map_err(store_error)?;

        Ok(summarize(&entries, self.clock.now_ms()))
    }
}

fn summarize(entries: &[AccessLogEntry], now: i64) -> AccessStats {
    let today = DateTime::<Utc>::from_timestamp_millis(now).map(|t| t.date_naive());
    let count = |outcome: AccessOutcome| entries.iter().filter(|e| e.outcome == outcome).count();

    AccessStats {
        total_attempts: entries.len(),
        today_attempts: entries
            .iter()
            .filter(|e| {
                DateTime::<Utc>::from_timestamp_millis(e.timestamp).map(|t| t.date_naive())
                    == today
            })
            .count(),
        successful_access: count(AccessOutcome::Success),
        failed_attempts: count(AccessOutcome::Failure),
        blocked_attempts: count(AccessOutcome::Blocked),
        last_access: entries
            .last()
            .and_then(|e| DateTime::<Utc>::from_timestamp_millis(e.timestamp)),
    }
}
