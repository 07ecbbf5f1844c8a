//! Human-verification challenge flow.
//!
//! The puzzle widget hands back an opaque proof token once solved. The
//! gate does not validate that token against the provider: any non-empty
//! token is accepted. A deployment that needs real assurance must verify
//! the token server-side with the provider before granting a session.
//!
//! ```text
//! Idle ──submit(no token)──▶ Error ──(3s)──▶ Idle
//!   │
//!   └──submit(token)──▶ Verifying ──(1.5s)──▶ Success ──(1s)──▶ on_verified
//!
//! any submit while the limiter reports blocked ──▶ Blocked
//! ```

mod widget;

pub use widget::{ChallengeWidget, WidgetView};

use gatehouse_common::{AccessMethod, AccessOutcome, ChallengePhase, GateError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::attempts::{AccessLogger, AttemptLimiter};
use crate::config::ChallengeConfig;
use crate::gate::VerifiedSignal;
use crate::scope::{TaskScope, lock};
use crate::session::SessionManager;

/// Widget-side contract: hand over the current proof, reset between attempts
pub trait ProofSource: Send + Sync {
    fn current_proof(&self) -> Option<String>;

    fn reset(&self) {}
}

/// Proof carried by a client submission
#[derive(Debug, Default)]
pub struct SubmittedProof(Mutex<Option<String>>);

impl SubmittedProof {
    pub fn new(token: Option<String>) -> Self {
        Self(Mutex::new(token))
    }
}

impl ProofSource for SubmittedProof {
    fn current_proof(&self) -> Option<String> {
        lock(&self.0).clone()
    }

    fn reset(&self) {
        lock(&self.0).take();
    }
}

/// Result of a submission that did not error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Access granted by this submission
    Granted,
    /// A verification is already running or finished; controls are disabled
    InProgress,
    /// The gate was already open
    AlreadyVerified,
    /// The gate was unmounted before access was granted
    Cancelled,
}

/// Cosmetic delays of the flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeTimings {
    pub verify_delay: Duration,
    pub success_hold: Duration,
    pub error_reset: Duration,
}

impl From<&ChallengeConfig> for ChallengeTimings {
    fn from(config: &ChallengeConfig) -> Self {
        Self {
            verify_delay: Duration::from_millis(config.verify_delay_ms),
            success_hold: Duration::from_millis(config.success_hold_ms),
            error_reset: Duration::from_millis(config.error_reset_ms),
        }
    }
}

/// Snapshot for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeView {
    pub phase: ChallengePhase,
    pub widget: WidgetView,
}

/// Everything the flow needs from its owner
pub struct ChallengeDeps {
    pub limiter: AttemptLimiter,
    pub session: SessionManager,
    pub logger: AccessLogger,
    pub signal: Arc<VerifiedSignal>,
}

/// Entry-gate challenge state machine
pub struct ChallengeFlow {
    phase: Arc<Mutex<ChallengePhase>>,
    widget: ChallengeWidget,
    deps: ChallengeDeps,
    timings: ChallengeTimings,
    scope: TaskScope,
}

impl ChallengeFlow {
    /// Mount the flow, entering `Blocked` if the limiter already says so
    pub async fn mount(widget: ChallengeWidget, deps: ChallengeDeps, timings: ChallengeTimings) -> Self {
        let phase = match deps.limiter.is_blocked().await {
            Ok(status) if status.blocked => ChallengePhase::Blocked {
                remaining_minutes: status.remaining_minutes.unwrap_or_default(),
            },
            Ok(_) => ChallengePhase::Idle,
            Err(e) => {
                tracing::warn!(error = %e, "Block check failed on mount, assuming not blocked");
                ChallengePhase::Idle
            }
        };

        if !widget.is_configured() {
            tracing::error!("Challenge site key missing, widget disabled");
        }

        Self {
            phase: Arc::new(Mutex::new(phase)),
            widget,
            deps,
            timings,
            scope: TaskScope::new(),
        }
    }

    pub fn phase(&self) -> ChallengePhase {
        *lock(&self.phase)
    }

    pub fn view(&self) -> ChallengeView {
        ChallengeView {
            phase: self.phase(),
            widget: self.widget.view(),
        }
    }

    /// Handle a click on the verify control
    ///
    /// `context` is stamped onto the access log entries of this submission.
    pub async fn submit(
        &self,
        proof: &dyn ProofSource,
        context: &Map<String, Value>,
    ) -> Result<SubmitOutcome, GateError> {
        if !self.widget.is_configured() {
            return Err(GateError::MisconfiguredChallenge);
        }

        // Claim the flow before the first await so concurrent submits back off
        let previous = {
            let mut phase = lock(&self.phase);
            if matches!(*phase, ChallengePhase::Verifying | ChallengePhase::Success) {
                return Ok(SubmitOutcome::InProgress);
            }
            std::mem::replace(&mut *phase, ChallengePhase::Verifying)
        };

        let logger = self.deps.logger.with_context(context.clone());

        let status = match self.deps.limiter.is_blocked().await {
            Ok(status) => status,
            Err(e) => {
                self.set_phase(previous);
                return Err(e);
            }
        };
        if status.blocked {
            let remaining_minutes = status.remaining_minutes.unwrap_or_default();
            self.set_phase(ChallengePhase::Blocked { remaining_minutes });
            logger
                .record(AccessOutcome::Blocked, AccessMethod::Challenge)
                .await;
            tracing::warn!(remaining_minutes, "Challenge submission refused, path blocked");
            return Err(GateError::RateLimited { remaining_minutes });
        }

        let Some(token) = proof.current_proof().filter(|t| !t.trim().is_empty()) else {
            tracing::debug!("Challenge submitted without a proof token");
            return Err(self.fail(proof, &logger).await);
        };

        // Cosmetic delay; an unmount here leaves the store untouched
        if self.scope.run(tokio::time::sleep(self.timings.verify_delay)).await.is_none() {
            tracing::debug!("Challenge torn down during verification");
            return Ok(SubmitOutcome::Cancelled);
        }

        if let Err(e) = self.verify(&token, &logger).await {
            tracing::warn!(error = %e, "Verification step failed");
            return Err(self.fail(proof, &logger).await);
        }

        self.set_phase(ChallengePhase::Success);
        tracing::info!("✅ Challenge passed");

        if self.scope.run(tokio::time::sleep(self.timings.success_hold)).await.is_none() {
            return Ok(SubmitOutcome::Cancelled);
        }
        self.deps.signal.fire();

        Ok(SubmitOutcome::Granted)
    }

    /// Accept the token and persist the session
    ///
    /// No network validation of the token occurs.
    async fn verify(&self, token: &str, logger: &AccessLogger) -> Result<(), GateError> {
        tracing::debug!(token_len = token.len(), "Accepting proof token");

        self.deps.limiter.clear().await?;
        logger
            .record(AccessOutcome::Success, AccessMethod::Challenge)
            .await;
        self.deps.session.record_success().await?;

        Ok(())
    }

    /// Record a failed attempt and show the transient error
    async fn fail(&self, proof: &dyn ProofSource, logger: &AccessLogger) -> GateError {
        if let Err(e) = self.deps.limiter.record_failure().await {
            tracing::warn!(error = %e, "Could not record failed attempt");
        }
        logger
            .record(AccessOutcome::Failure, AccessMethod::Challenge)
            .await;

        proof.reset();
        self.set_phase(ChallengePhase::Error);

        let phase = Arc::downgrade(&self.phase);
        self.scope.spawn_after(self.timings.error_reset, move || {
            // The flow may have been torn down in the meantime
            if let Some(phase) = phase.upgrade() {
                let mut current = lock(&phase);
                if *current == ChallengePhase::Error {
                    *current = ChallengePhase::Idle;
                }
            }
        });

        GateError::NoProofSubmitted
    }

    /// Stop pending timers and interrupt a running verification
    pub fn close(&self) {
        self.scope.close();
    }

    fn set_phase(&self, phase: ChallengePhase) {
        *lock(&self.phase) = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::policy::{BlockPolicy, SessionPolicy};
    use crate::store::{GateRepository, LimiterPath, LogStream, MemoryStore};
    use gatehouse_common::{BuildMode, Theme};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;
    use tokio_test::{assert_err, assert_ok};

    struct Harness {
        flow: ChallengeFlow,
        repo: GateRepository,
        clock: Arc<ManualClock>,
        granted: Arc<AtomicUsize>,
        _theme: watch::Sender<Theme>,
    }

    async fn harness_with(site_key: Option<&str>, repo: GateRepository) -> Harness {
        let clock = Arc::new(ManualClock::at(1_760_000_000_000));
        let (theme_tx, theme_rx) = watch::channel(Theme::Light);
        let granted = Arc::new(AtomicUsize::new(0));

        let counter = granted.clone();
        let signal = Arc::new(VerifiedSignal::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let deps = ChallengeDeps {
            limiter: AttemptLimiter::new(
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
                Default::default(),
            ),
            signal,
        };
        let timings = ChallengeTimings {
            verify_delay: Duration::from_millis(1500),
            success_hold: Duration::from_millis(1000),
            error_reset: Duration::from_millis(3000),
        };
        let widget = ChallengeWidget::new(site_key.map(String::from), theme_rx);

        Harness {
            flow: ChallengeFlow::mount(widget, deps, timings).await,
            repo,
            clock,
            granted,
            _theme: theme_tx,
        }
    }

    impl Harness {
        async fn submit(&self, token: Option<&str>) -> Result<SubmitOutcome, GateError> {
            let proof = SubmittedProof::new(token.map(String::from));
            self.flow.submit(&proof, &Map::new()).await
        }
    }

    async fn harness() -> Harness {
        harness_with(Some("site-key"), GateRepository::new(Arc::new(MemoryStore::new()))).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_store_starts_idle() {
        let h = harness().await;
        assert_eq!(h.flow.phase(), ChallengePhase::Idle);
        assert!(matches!(h.flow.view().widget, WidgetView::Ready { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_token_records_failure_and_reverts() {
        let h = harness().await;

        let err = assert_err!(h.submit(None).await);
        assert_eq!(err, GateError::NoProofSubmitted);
        assert_eq!(h.flow.phase(), ChallengePhase::Error);
        assert_eq!(h.repo.counter(LimiterPath::Challenge).await.unwrap().count, 1);

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(h.flow.phase(), ChallengePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_whitespace_token_counts_as_missing() {
        let h = harness().await;
        let proof = SubmittedProof::new(Some("   ".into()));
        assert_eq!(h.flow.submit(&proof, &Map::new()).await, Err(GateError::NoProofSubmitted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifth_failure_blocks_next_submit() {
        let h = harness().await;

        for _ in 0..5 {
            let _ = h.submit(None).await;
        }

        let err = h.submit(Some("tok")).await;
        assert_eq!(err, Err(GateError::RateLimited { remaining_minutes: 15 }));
        assert_eq!(h.flow.phase(), ChallengePhase::Blocked { remaining_minutes: 15 });
        assert_eq!(h.granted.load(Ordering::SeqCst), 0);

        let log = h.repo.log(LogStream::General).await.unwrap();
        assert_eq!(log.last().unwrap().outcome, AccessOutcome::Blocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_lifts_after_window_on_next_submit() {
        let h = harness().await;
        for _ in 0..5 {
            let _ = h.submit(None).await;
        }

        h.clock.advance_minutes(15);
        let outcome = assert_ok!(h.submit(Some("tok")).await);
        assert_eq!(outcome, SubmitOutcome::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_grants_access_and_records_session() {
        let h = harness().await;
        h.submit(None).await.unwrap_err();

        let outcome = h.submit(Some("proof-token")).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Granted);
        assert_eq!(h.flow.phase(), ChallengePhase::Success);
        assert_eq!(h.granted.load(Ordering::SeqCst), 1);
        assert_eq!(h.repo.counter(LimiterPath::Challenge).await.unwrap().count, 0);

        let session = h.repo.session().await.unwrap();
        assert!(session.verified);
        assert_eq!(session.verified_at, Some(h.clock.now_ms()));

        // Controls are disabled once verified
        let again = h.submit(Some("x")).await;
        assert_eq!(again, Ok(SubmitOutcome::InProgress));
        assert_eq!(h.granted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_revert_does_not_clobber_success() {
        let h = harness().await;
        h.submit(None).await.unwrap_err();
        h.submit(Some("tok")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.flow.phase(), ChallengePhase::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_site_key_refuses_without_recording() {
        let repo = GateRepository::new(Arc::new(MemoryStore::new()));
        let h = harness_with(None, repo).await;

        let err = h.submit(Some("tok")).await;
        assert_eq!(err, Err(GateError::MisconfiguredChallenge));
        assert_eq!(h.repo.counter(LimiterPath::Challenge).await.unwrap().count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_while_blocked() {
        let repo = GateRepository::new(Arc::new(MemoryStore::new()));
        {
            let h = harness_with(Some("site-key"), repo.clone()).await;
            for _ in 0..5 {
                let _ = h.submit(None).await;
            }
        }

        let h = harness_with(Some("site-key"), repo).await;
        assert_eq!(h.flow.phase(), ChallengePhase::Blocked { remaining_minutes: 15 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submits_verify_once() {
        let h = harness().await;

        let (first, second) = tokio::join!(h.submit(Some("a")), h.submit(Some("b")));
        let mut outcomes = [first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| *o != SubmitOutcome::Granted);
        assert_eq!(outcomes, [SubmitOutcome::Granted, SubmitOutcome::InProgress]);

        let successes = h
            .repo
            .log(LogStream::General)
            .await
            .unwrap()
            .iter()
            .filter(|e| e.outcome == AccessOutcome::Success)
            .count();
        assert_eq!(successes, 1);
        assert_eq!(h.granted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_verification_records_nothing() {
        let h = harness().await;

        let (outcome, ()) = tokio::join!(h.submit(Some("tok")), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            h.flow.close();
        });

        assert_eq!(outcome, Ok(SubmitOutcome::Cancelled));
        assert!(!h.repo.session().await.unwrap().verified);
        assert!(h.repo.log(LogStream::General).await.unwrap().is_empty());
        assert_eq!(h.granted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_success_hold_skips_notification() {
        let h = harness().await;

        let (outcome, ()) = tokio::join!(h.submit(Some("tok")), async {
            tokio::time::sleep(Duration::from_millis(2000)).await;
            h.flow.close();
        });

        assert_eq!(outcome, Ok(SubmitOutcome::Cancelled));
        assert_eq!(h.granted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_in_error_state_cancels_revert() {
        let h = harness().await;
        h.submit(None).await.unwrap_err();

        h.flow.close();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.flow.phase(), ChallengePhase::Error);
        assert_eq!(h.repo.counter(LimiterPath::Challenge).await.unwrap().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_submission_logs_its_own_context() {
        let h = harness().await;

        for agent in ["agent-a", "agent-b"] {
            let mut context = Map::new();
            context.insert("user_agent".into(), agent.into());
            let proof = SubmittedProof::new(None);
            h.flow.submit(&proof, &context).await.unwrap_err();
        }

        let log = h.repo.log(LogStream::General).await.unwrap();
        assert_eq!(log[0].context["user_agent"], "agent-a");
        assert_eq!(log[1].context["user_agent"], "agent-b");
    }
}
