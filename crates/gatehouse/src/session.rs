//! Remembered verification ("skip the gate for 24h").

use gatehouse_common::GateError;
use std::sync::Arc;

use crate::clock::Clock;
use crate::policy::SessionPolicy;
use crate::store::{GateRepository, store_error};

/// Reads and records the time-boxed verification session
///
/// Both success paths (challenge and bypass) go through `record_success`;
/// nothing else writes the verified flag.
#[derive(Clone)]
pub struct SessionManager {
    repo: GateRepository,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(repo: GateRepository, policy: SessionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            policy,
            clock,
        }
    }

    /// Check the session, removing it if it has expired
    pub async fn is_valid(&self) -> Result<bool, GateError> {
        let record = self.repo.session().await.map_err(store_error)?;
        let eval = self.policy.evaluate(&record, self.clock.now_ms());

        if eval.expire {
            self.repo.clear_session().await.map_err(store_error)?;
            tracing::debug!(verified_at = ?record.verified_at, "Expired verification session cleared");
        }

        Ok(eval.valid)
    }

    pub async fn record_success(&self) -> Result<(), GateError> {
        let now = self.clock.now_ms();
        self.repo.put_session(now).await.map_err(store_error)?;
        tracing::debug!(verified_at = now, "Verification session recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{KeyValueStore, MemoryStore};
    use gatehouse_common::constants::keys;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn setup() -> (SessionManager, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at(1_760_000_000_000));
        let manager = SessionManager::new(
            GateRepository::new(store.clone()),
            SessionPolicy::default(),
            clock.clone(),
        );
        (manager, store, clock)
    }

    #[tokio::test]
    async fn test_fresh_store_has_no_session() {
        let (manager, _, _) = setup();
        assert!(!manager.is_valid().await.unwrap());
    }

    #[tokio::test]
    async fn test_session_valid_within_a_day_and_untouched() {
        let (manager, store, clock) = setup();
        manager.record_success().await.unwrap();

        clock.advance_ms(24 * HOUR_MS - 1);
        assert!(manager.is_valid().await.unwrap());
        assert_eq!(store.get(keys::VERIFIED).await.unwrap().as_deref(), Some("true"));
        assert!(store.get(keys::VERIFIED_AT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_session_clears_both_keys() {
        let (manager, store, clock) = setup();
        manager.record_success().await.unwrap();

        clock.advance_ms(24 * HOUR_MS);
        assert!(!manager.is_valid().await.unwrap());
        assert_eq!(store.get(keys::VERIFIED).await.unwrap(), None);
        assert_eq!(store.get(keys::VERIFIED_AT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_record_success_twice_keeps_latest() {
        let (manager, store, clock) = setup();
        manager.record_success().await.unwrap();
        clock.advance_ms(5_000);
        manager.record_success().await.unwrap();

        let expected = clock.now_ms();
        assert_eq!(
            store.get(keys::VERIFIED_AT).await.unwrap(),
            Some(expected.to_string())
        );
        assert_eq!(store.len().await, 2);
        assert!(manager.is_valid().await.unwrap());
    }
}
