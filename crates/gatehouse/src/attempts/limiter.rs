//! Store-backed limiters.

use gatehouse_common::{BlockStatus, FailureCounter, GateError};
use std::sync::Arc;

use crate::clock::Clock;
use crate::policy::{BlockPolicy, BurstPolicy};
use crate::store::{GateRepository, LimiterPath, LogStream, store_error};

/// Failure counter + block window for one path
#[derive(Clone)]
pub struct AttemptLimiter {
    repo: GateRepository,
    path: LimiterPath,
    policy: BlockPolicy,
    clock: Arc<dyn Clock>,
}

impl AttemptLimiter {
    pub fn new(
        repo: GateRepository,
        path: LimiterPath,
        policy: BlockPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            path,
            policy,
            clock,
        }
    }

    /// Check the block, wiping the counter once its window has elapsed
    pub async fn is_blocked(&self) -> Result<BlockStatus, GateError> {
        let counter = self.repo.counter(self.path).await.map_err(store_error)?;
        let eval = self.policy.evaluate(&counter, self.clock.now_ms());

        if eval.reset {
            self.repo.clear_counter(self.path).await.map_err(store_error)?;
            tracing::debug!(
                path = self.path.as_str(),
                failures = counter.count,
                "Block window elapsed, failure counter reset"
            );
        }

        Ok(eval.status)
    }

    /// Count a failure; returns the new total
    pub async fn record_failure(&self) -> Result<u32, GateError> {
        let counter = self.repo.counter(self.path).await.map_err(store_error)?;
        let updated = FailureCounter {
            count: counter.count.saturating_add(1),
            last_attempt_at: Some(self.clock.now_ms()),
        };

        self.repo
            .put_counter(self.path, updated)
            .await
            .map_err(store_error)?;

        if updated.count >= self.policy.threshold {
            tracing::warn!(
                path = self.path.as_str(),
                failures = updated.count,
                "Attempt limit reached, path blocked"
            );
        } else {
            tracing::debug!(
                path = self.path.as_str(),
                failures = updated.count,
                "Failed attempt recorded"
            );
        }

        Ok(updated.count)
    }

    pub async fn clear(&self) -> Result<(), GateError> {
        self.repo.clear_counter(self.path).await.map_err(store_error)
    }

    /// Current failure count (no reset applied)
    pub async fn attempts(&self) -> Result<u32, GateError> {
        Ok(self.repo.counter(self.path).await.map_err(store_error)?.count)
    }

    pub fn policy(&self) -> BlockPolicy {
        self.policy
    }
}

/// Volume limiter over an access log stream
#[derive(Clone)]
pub struct BurstLimiter {
    repo: GateRepository,
    stream: LogStream,
    policy: BurstPolicy,
    clock: Arc<dyn Clock>,
}

impl BurstLimiter {
    pub fn new(
        repo: GateRepository,
        stream: LogStream,
        policy: BurstPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            stream,
            policy,
            clock,
        }
    }

    pub async fn is_blocked(&self) -> Result<BlockStatus, GateError> {
        let entries = self.repo.log(self.stream).await.map_err(store_error)?;
        let status = self.policy.evaluate(&entries, self.clock.now_ms());

        if status.blocked {
            tracing::warn!(entries = entries.len(), "Burst limit reached");
        }

        Ok(status)
    }
}
