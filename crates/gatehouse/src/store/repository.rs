//! Typed accessors over the raw key-value store.
//!
//! Each logical record (session, per-path failure counter, access log,
//! bypass session) gets its own accessors, so components depend on a
//! record rather than on key names.

use anyhow::{Context, Result};
use gatehouse_common::constants::{ACCESS_LOG_CAP, BYPASS_LOG_CAP, keys};
use gatehouse_common::{AccessLogEntry, FailureCounter, SessionRecord};
use std::sync::Arc;

use super::KeyValueStore;

/// Which failure counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterPath {
    Challenge,
    Bypass,
}

impl LimiterPath {
    fn keys(&self) -> (&'static str, &'static str) {
        match self {
            Self::Challenge => (keys::CHALLENGE_FAILURES, keys::CHALLENGE_LAST_FAILURE),
            Self::Bypass => (keys::BYPASS_FAILURES, keys::BYPASS_LAST_FAILURE),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Challenge => "challenge",
            Self::Bypass => "bypass",
        }
    }
}

/// Which access log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    General,
    Bypass,
}

impl LogStream {
    fn key(&self) -> &'static str {
        match self {
            Self::General => keys::ACCESS_LOG,
            Self::Bypass => keys::BYPASS_LOG,
        }
    }

    /// Entries retained; older ones are dropped first
    pub fn cap(&self) -> usize {
        match self {
            Self::General => ACCESS_LOG_CAP,
            Self::Bypass => BYPASS_LOG_CAP,
        }
    }
}

/// Bypass-origin session markers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BypassSessionRecord {
    pub token: Option<String>,
    pub origin: bool,
    pub verified: bool,
}

/// Typed gate state over a (namespaced) store
#[derive(Clone)]
pub struct GateRepository {
    store: Arc<dyn KeyValueStore>,
}

impl GateRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    // === Session ===

    pub async fn session(&self) -> Result<SessionRecord> {
        let verified = self.store.get(keys::VERIFIED).await?;
        let verified_at = self.store.get(keys::VERIFIED_AT).await?;

        Ok(SessionRecord {
            verified: verified.is_some_and(|v| !v.is_empty()),
            verified_at: verified_at.as_deref().and_then(|v| parse_or_warn(keys::VERIFIED_AT, v)),
        })
    }

    pub async fn put_session(&self, verified_at: i64) -> Result<()> {
        self.store.set(keys::VERIFIED, "true").await?;
        self.store
            .set(keys::VERIFIED_AT, &verified_at.to_string())
            .await?;
        Ok(())
    }

    pub async fn clear_session(&self) -> Result<()> {
        self.store.remove(keys::VERIFIED).await?;
        self.store.remove(keys::VERIFIED_AT).await?;
        Ok(())
    }

    // === Failure counters ===

    pub async fn counter(&self, path: LimiterPath) -> Result<FailureCounter> {
        let (count_key, at_key) = path.keys();
        let count = self.store.get(count_key).await?;
        let last = self.store.get(at_key).await?;

        Ok(FailureCounter {
            count: count
                .as_deref()
                .and_then(|v| parse_or_warn(count_key, v))
                .unwrap_or(0),
            last_attempt_at: last.as_deref().and_then(|v| parse_or_warn(at_key, v)),
        })
    }

    pub async fn put_counter(&self, path: LimiterPath, counter: FailureCounter) -> Result<()> {
        let (count_key, at_key) = path.keys();
        self.store.set(count_key, &counter.count.to_string()).await?;
        match counter.last_attempt_at {
            Some(at) => self.store.set(at_key, &at.to_string()).await?,
            None => self.store.remove(at_key).await?,
        }
        Ok(())
    }

    pub async fn clear_counter(&self, path: LimiterPath) -> Result<()> {
        let (count_key, at_key) = path.keys();
        self.store.remove(count_key).await?;
        self.store.remove(at_key).await?;
        Ok(())
    }

    // === Access logs ===

    pub async fn log(&self, stream: LogStream) -> Result<Vec<AccessLogEntry>> {
        let Some(raw) = self.store.get(stream.key()).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!(key = stream.key(), error = %e, "Discarding unreadable access log");
                Ok(Vec::new())
            }
        }
    }

    /// Append and evict down to the stream's cap
    pub async fn append_log(&self, stream: LogStream, entry: AccessLogEntry) -> Result<()> {
        let mut entries = self.log(stream).await?;
        entries.push(entry);

        let cap = stream.cap();
        if entries.len() > cap {
            entries.drain(..entries.len() - cap);
        }

        let data = serde_json::to_string(&entries).context("Failed to encode access log")?;
        self.store.set(stream.key(), &data).await
    }

    // === Bypass session ===

    pub async fn bypass_session(&self) -> Result<BypassSessionRecord> {
        let token = self.store.get(keys::BYPASS_SESSION).await?;
        let origin = self.store.get(keys::BYPASS_ORIGIN).await?;
        let verified = self.store.get(keys::BYPASS_VERIFIED).await?;

        Ok(BypassSessionRecord {
            token: token.filter(|t| !t.is_empty()),
            origin: origin.is_some_and(|v| !v.is_empty()),
            verified: verified.is_some_and(|v| !v.is_empty()),
        })
    }

    pub async fn put_bypass_session(&self, token: &str) -> Result<()> {
        self.store.set(keys::BYPASS_ORIGIN, "true").await?;
        self.store.set(keys::BYPASS_VERIFIED, "true").await?;
        self.store.set(keys::BYPASS_SESSION, token).await?;
        Ok(())
    }

    pub async fn clear_bypass_session(&self) -> Result<()> {
        self.store.remove(keys::BYPASS_ORIGIN).await?;
        self.store.remove(keys::BYPASS_VERIFIED).await?;
        self.store.remove(keys::BYPASS_SESSION).await?;
        Ok(())
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key = %key, value = %raw, "Ignoring malformed stored value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use gatehouse_common::{AccessMethod, AccessOutcome};

    fn repo() -> GateRepository {
        GateRepository::new(Arc::new(MemoryStore::new()))
    }

    fn entry(ts: i64) -> AccessLogEntry {
        AccessLogEntry::new(ts, AccessOutcome::Failure, AccessMethod::Challenge)
    }

    #[tokio::test]
    async fn test_general_log_keeps_most_recent_hundred() {
        let repo = repo();
        for ts in 0..130 {
            repo.append_log(LogStream::General, entry(ts)).await.unwrap();
        }

        let log = repo.log(LogStream::General).await.unwrap();
        assert_eq!(log.len(), 100);
        assert_eq!(log.first().unwrap().timestamp, 30);
        assert_eq!(log.last().unwrap().timestamp, 129);
        assert!(log.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_bypass_log_keeps_most_recent_fifty() {
        let repo = repo();
        for ts in 0..51 {
            repo.append_log(LogStream::Bypass, entry(ts)).await.unwrap();
        }

        let log = repo.log(LogStream::Bypass).await.unwrap();
        assert_eq!(log.len(), 50);
        assert_eq!(log[0].timestamp, 1);

        // The general log is untouched
        assert!(repo.log(LogStream::General).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_values_read_as_absent() {
        let repo = repo();
        repo.store().set(keys::CHALLENGE_FAILURES, "lots").await.unwrap();
        repo.store().set(keys::ACCESS_LOG, "{not json").await.unwrap();

        let counter = repo.counter(LimiterPath::Challenge).await.unwrap();
        assert_eq!(counter, FailureCounter::default());
        assert!(repo.log(LogStream::General).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_counters_are_separate_records() {
        let repo = repo();
        let counter = FailureCounter {
            count: 3,
            last_attempt_at: Some(42),
        };
        repo.put_counter(LimiterPath::Bypass, counter).await.unwrap();

        assert_eq!(repo.counter(LimiterPath::Bypass).await.unwrap(), counter);
        assert_eq!(
            repo.counter(LimiterPath::Challenge).await.unwrap(),
            FailureCounter::default()
        );

        repo.clear_counter(LimiterPath::Bypass).await.unwrap();
        assert_eq!(repo.store().get(keys::BYPASS_FAILURES).await.unwrap(), None);
    }
}
