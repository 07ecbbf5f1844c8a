//! Password bypass for non-production builds.
//!
//! A second route to the verified state, guarded by its own failure
//! counter (3 failures / 30 minutes) and by a burst limiter over the
//! bypass log (more than 10 entries in 5 minutes). Successful bypasses
//! additionally mark the session as bypass-origin.

mod credential;

pub use credential::{BypassCredential, session_token};

use gatehouse_common::{
    AccessMethod, AccessOutcome, BuildMode, GateError, SessionRecord,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::attempts::{AccessLogger, AttemptLimiter, BurstLimiter};
use crate::challenge::SubmitOutcome;
use crate::clock::Clock;
use crate::gate::VerifiedSignal;
use crate::policy::{SessionPolicy, ceil_minutes};
use crate::scope::{TaskScope, lock};
use crate::session::SessionManager;
use crate::store::{GateRepository, LimiterPath, store_error};

/// Whether the bypass panel exists at all in this build
pub fn is_enabled(build_mode: BuildMode, credential: &BypassCredential) -> bool {
    !build_mode.is_production() && credential.is_configured()
}

/// Everything the panel needs from its owner
pub struct BypassDeps {
    pub repo: GateRepository,
    pub limiter: AttemptLimiter,
    pub burst: BurstLimiter,
    /// Challenge-path counter, cleared on a successful bypass
    pub challenge_limiter: AttemptLimiter,
    pub session: SessionManager,
    pub logger: AccessLogger,
    pub signal: Arc<VerifiedSignal>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct PanelState {
    input: String,
    message: Option<String>,
    blocked: bool,
    attempts: u32,
}

/// Snapshot for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BypassView {
    pub blocked: bool,
    pub attempts_left: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The bypass overlay
pub struct BypassPanel {
    credential: BypassCredential,
    state: Arc<Mutex<PanelState>>,
    deps: BypassDeps,
    message_reset: Duration,
    scope: TaskScope,
}

impl BypassPanel {
    pub async fn mount(
        credential: BypassCredential,
        deps: BypassDeps,
        message_reset: Duration,
    ) -> Self {
        let mut state = PanelState::default();

        match Self::block_status(&deps).await {
            Ok(Some(remaining_minutes)) => {
                state.blocked = true;
                state.message = Some(GateError::RateLimited { remaining_minutes }.to_string());
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Bypass block check failed on mount"),
        }

        state.attempts = deps.limiter.attempts().await.unwrap_or_default();

        Self {
            credential,
            state: Arc::new(Mutex::new(state)),
            deps,
            message_reset,
            scope: TaskScope::new(),
        }
    }

    /// Burst limiter first, then the failure counter
    async fn block_status(deps: &BypassDeps) -> Result<Option<u32>, GateError> {
        let burst = deps.burst.is_blocked().await?;
        if burst.blocked {
            return Ok(burst.remaining_minutes);
        }

        let counter = deps.limiter.is_blocked().await?;
        Ok(counter.blocked.then(|| counter.remaining_minutes.unwrap_or_default()))
    }

    pub fn view(&self) -> BypassView {
        let state = lock(&self.state);
        BypassView {
            blocked: state.blocked,
            attempts_left: self.deps.limiter.policy().remaining_attempts(state.attempts),
            message: state.message.clone(),
        }
    }

    /// Type into the password field
    pub fn set_input(&self, value: &str) {
        lock(&self.state).input = value.to_string();
    }

    pub fn input(&self) -> String {
        lock(&self.state).input.clone()
    }

    /// Submit the password field
    ///
    /// `context` is stamped onto the access log entries of this submission.
    pub async fn submit(&self, context: &Map<String, Value>) -> Result<SubmitOutcome, GateError> {
        if self.deps.signal.is_fired() {
            return Ok(SubmitOutcome::AlreadyVerified);
        }

        if let Some(remaining_minutes) = Self::block_status(&self.deps).await? {
            let mut state = lock(&self.state);
            state.blocked = true;
            state.message = Some("Bypass access blocked. Too many failed attempts.".to_string());
            return Err(GateError::RateLimited { remaining_minutes });
        }
        lock(&self.state).blocked = false;

        let logger = self.deps.logger.with_context(context.clone());
        let candidate = self.input();
        if self.credential.verify_password(&candidate) {
            self.grant(&logger).await?;
            Ok(SubmitOutcome::Granted)
        } else {
            Err(self.reject(&logger).await)
        }
    }

    /// Stop the pending message timer
    pub fn close(&self) {
        self.scope.close();
    }

    async fn grant(&self, logger: &AccessLogger) -> Result<(), GateError> {
        let token = session_token(self.deps.clock.now_ms());

        self.deps.challenge_limiter.clear().await?;
        logger
            .record(AccessOutcome::Success, AccessMethod::Bypass)
            .await;

        let mut extra = Map::new();
        extra.insert("session_token".into(), token.clone().into());
        logger.record_bypass(true, extra).await;

        self.deps.session.record_success().await?;
        self.deps
            .repo
            .put_bypass_session(&token)
            .await
            .map_err(store_error)?;
        self.deps.limiter.clear().await?;

        {
            let mut state = lock(&self.state);
            state.input.clear();
            state.attempts = 0;
            state.message = None;
        }

        tracing::info!("🔑 Bypass session started");
        self.deps.signal.fire();
        Ok(())
    }

    async fn reject(&self, logger: &AccessLogger) -> GateError {
        let attempts = match self.deps.limiter.record_failure().await {
            Ok(attempts) => attempts,
            Err(e) => {
                lock(&self.state).input.clear();
                return e;
            }
        };

        logger
            .record(AccessOutcome::Failure, AccessMethod::Bypass)
            .await;
        let mut extra = Map::new();
        extra.insert("attempts".into(), attempts.into());
        logger.record_bypass(false, extra).await;

        let policy = self.deps.limiter.policy();
        let (err, message) = if attempts >= policy.threshold {
            let remaining_minutes = ceil_minutes(policy.window_ms);
            (
                GateError::RateLimited { remaining_minutes },
                format!(
                    "Bypass access blocked for {} minutes. Failed attempts: {}",
                    remaining_minutes, attempts
                ),
            )
        } else {
            let err = GateError::InvalidCredential {
                remaining_attempts: policy.remaining_attempts(attempts),
            };
            let message = err.to_string();
            (err, message)
        };

        {
            let mut state = lock(&self.state);
            state.input.clear();
            state.attempts = attempts;
            state.blocked = matches!(err, GateError::RateLimited { .. });
            state.message = Some(message);
        }

        let state = Arc::downgrade(&self.state);
        self.scope.spawn_after(self.message_reset, move || {
            if let Some(state) = state.upgrade() {
                lock(&state).message = None;
            }
        });

        err
    }
}

/// True when a bypass-origin session exists and is still within its TTL
///
/// Stale or partial bypass markers are cleared.
pub async fn is_valid_bypass_session(
    repo: &GateRepository,
    policy: &SessionPolicy,
    now: i64,
) -> Result<bool, GateError> {
    let marker = repo.bypass_session().await.map_err(store_error)?;
    let session = repo.session().await.map_err(store_error)?;

    if marker.token.is_none() || !marker.origin || !marker.verified {
        return Ok(false);
    }
    let Some(verified_at) = session.verified_at else {
        return Ok(false);
    };

    let record = SessionRecord {
        verified: true,
        verified_at: Some(verified_at),
    };
    if policy.evaluate(&record, now).valid {
        return Ok(true);
    }

    clear_bypass_data(repo).await?;
    Ok(false)
}

/// Remove bypass markers and the bypass failure counter
pub async fn clear_bypass_data(repo: &GateRepository) -> Result<(), GateError> {
    repo.clear_bypass_session().await.map_err(store_error)?;
    repo.clear_counter(LimiterPath::Bypass)
        .await
        .map_err(store_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::policy::{BlockPolicy, BurstPolicy};
    use crate::store::{KeyValueStore, LogStream, MemoryStore};
    use async_trait::async_trait;
    use gatehouse_common::AccessLogEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &str = "let-me-in";

    struct Harness {
        panel: BypassPanel,
        repo: GateRepository,
        clock: Arc<ManualClock>,
        granted: Arc<AtomicUsize>,
    }

    async fn harness_on(repo: GateRepository, clock: Arc<ManualClock>) -> Harness {
        let granted = Arc::new(AtomicUsize::new(0));
        let counter = granted.clone();
        let signal = Arc::new(VerifiedSignal::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let deps = BypassDeps {
            repo: repo.clone(),
            limiter: AttemptLimiter::new(
                repo.clone(),
                LimiterPath::Bypass,
                BlockPolicy::BYPASS,
                clock.clone(),
            ),
            burst: BurstLimiter::new(
                repo.clone(),
                LogStream::Bypass,
                BurstPolicy::BYPASS,
                clock.clone(),
            ),
            challenge_limiter: AttemptLimiter::new(
                repo.clone(),
                LimiterPath::Challenge,
                BlockPolicy::CHALLENGE,
                clock.clone(),
            ),
            session: SessionManager::new(repo.clone(), SessionPolicy::default(), clock.clone()),
            logger: AccessLogger::new(
                repo.clone(),
                clock.clone(),
                BuildMode::Development,
                Map::new(),
            ),
            signal,
            clock: clock.clone(),
        };

        let credential = BypassCredential::new(Some(SECRET.into()));
        Harness {
            panel: BypassPanel::mount(credential, deps, Duration::from_secs(5)).await,
            repo,
            clock,
            granted,
        }
    }

    async fn harness() -> Harness {
        harness_on(
            GateRepository::new(Arc::new(MemoryStore::new())),
            Arc::new(ManualClock::at(1_760_000_000_000)),
        )
        .await
    }

    async fn attempt(panel: &BypassPanel, password: &str) -> Result<SubmitOutcome, GateError> {
        panel.set_input(password);
        panel.submit(&Map::new()).await
    }

    #[test]
    fn test_enabled_only_outside_production_with_secret() {
        let secret = BypassCredential::new(Some(SECRET.into()));
        let none = BypassCredential::new(None);

        assert!(is_enabled(BuildMode::Development, &secret));
        assert!(!is_enabled(BuildMode::Production, &secret));
        assert!(!is_enabled(BuildMode::Development, &none));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_password_clears_input_and_counts_down() {
        let h = harness().await;

        let err = attempt(&h.panel, "nope").await;
        assert_eq!(err, Err(GateError::InvalidCredential { remaining_attempts: 2 }));
        assert_eq!(h.panel.input(), "");

        let view = h.panel.view();
        assert_eq!(view.attempts_left, 2);
        assert!(!view.blocked);
        assert_eq!(view.message.as_deref(), Some("Invalid password. 2 attempts remaining."));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.panel.view().message, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_failure_escalates_to_rate_limited() {
        let h = harness().await;
        attempt(&h.panel, "a").await.unwrap_err();
        attempt(&h.panel, "b").await.unwrap_err();

        let err = attempt(&h.panel, "c").await;
        assert_eq!(err, Err(GateError::RateLimited { remaining_minutes: 30 }));
        assert!(h.panel.view().blocked);

        // Even the right password is refused while blocked
        let err = attempt(&h.panel, SECRET).await;
        assert_eq!(err, Err(GateError::RateLimited { remaining_minutes: 30 }));
        assert_eq!(h.granted.load(Ordering::SeqCst), 0);

        // Challenge path is unaffected
        assert_eq!(h.repo.counter(LimiterPath::Challenge).await.unwrap().count, 0);

        h.clock.advance_minutes(30);
        assert_eq!(attempt(&h.panel, SECRET).await, Ok(SubmitOutcome::Granted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_writes_bypass_session() {
        let h = harness().await;
        h.repo
            .put_counter(
                LimiterPath::Challenge,
                gatehouse_common::FailureCounter {
                    count: 4,
                    last_attempt_at: Some(h.clock.now_ms()),
                },
            )
            .await
            .unwrap();
        attempt(&h.panel, "wrong").await.unwrap_err();

        assert_eq!(attempt(&h.panel, SECRET).await, Ok(SubmitOutcome::Granted));
        assert_eq!(h.granted.load(Ordering::SeqCst), 1);

        let marker = h.repo.bypass_session().await.unwrap();
        assert!(marker.origin && marker.verified);
        assert!(marker.token.unwrap().starts_with("bypass_"));
        assert!(h.repo.session().await.unwrap().verified);
        assert_eq!(h.repo.counter(LimiterPath::Challenge).await.unwrap().count, 0);
        assert_eq!(h.repo.counter(LimiterPath::Bypass).await.unwrap().count, 0);

        let general = h.repo.log(LogStream::General).await.unwrap();
        assert_eq!(general.last().unwrap().outcome, AccessOutcome::Success);
        assert_eq!(general.last().unwrap().method, AccessMethod::Bypass);

        let bypass_log = h.repo.log(LogStream::Bypass).await.unwrap();
        assert_eq!(bypass_log.len(), 2);
        assert!(bypass_log[1].context.contains_key("session_token"));

        let policy = SessionPolicy::default();
        assert!(is_valid_bypass_session(&h.repo, &policy, h.clock.now_ms()).await.unwrap());

        assert_eq!(attempt(&h.panel, SECRET).await, Ok(SubmitOutcome::AlreadyVerified));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_limiter_blocks_on_mount() {
        let repo = GateRepository::new(Arc::new(MemoryStore::new()));
        let clock = Arc::new(ManualClock::at(1_760_000_000_000));
        for _ in 0..11 {
            let entry = AccessLogEntry::new(clock.now_ms(), AccessOutcome::Success, AccessMethod::Bypass);
            repo.append_log(LogStream::Bypass, entry).await.unwrap();
        }

        let h = harness_on(repo, clock).await;
        let view = h.panel.view();
        assert!(view.blocked);
        assert_eq!(
            view.message.as_deref(),
            Some("Too many attempts. Try again in 5 minutes.")
        );
        assert_eq!(
            attempt(&h.panel, SECRET).await,
            Err(GateError::RateLimited { remaining_minutes: 5 })
        );

        h.clock.advance_minutes(5);
        assert_eq!(attempt(&h.panel, SECRET).await, Ok(SubmitOutcome::Granted));
    }

    #[tokio::test]
    async fn test_expired_bypass_session_is_cleared() {
        let repo = GateRepository::new(Arc::new(MemoryStore::new()));
        let now = 1_760_000_000_000;
        let day = 24 * 60 * 60 * 1000;

        repo.put_session(now - day - 1).await.unwrap();
        repo.put_bypass_session("bypass_1_abc").await.unwrap();

        let policy = SessionPolicy::default();
        assert!(!is_valid_bypass_session(&repo, &policy, now).await.unwrap());
        assert_eq!(repo.bypass_session().await.unwrap(), Default::default());
    }

    #[tokio::test]
    async fn test_challenge_session_is_not_bypass_origin() {
        let repo = GateRepository::new(Arc::new(MemoryStore::new()));
        repo.put_session(1_760_000_000_000).await.unwrap();

        let policy = SessionPolicy::default();
        assert!(!is_valid_bypass_session(&repo, &policy, 1_760_000_000_000).await.unwrap());
    }

    /// Reads succeed (empty), every write fails
    struct ReadOnlyStore;

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            anyhow::bail!("read-only")
        }

        async fn remove(&self, _key: &str) -> anyhow::Result<()> {
            anyhow::bail!("read-only")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_still_clears_input() {
        let h = harness_on(
            GateRepository::new(Arc::new(ReadOnlyStore)),
            Arc::new(ManualClock::at(1_760_000_000_000)),
        )
        .await;

        let err = attempt(&h.panel, "wrong").await.unwrap_err();
        assert!(matches!(err, GateError::Store(_)));
        assert_eq!(h.panel.input(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_message_clear() {
        let h = harness().await;
        attempt(&h.panel, "nope").await.unwrap_err();

        h.panel.close();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(h.panel.view().message.is_some());
    }
}
