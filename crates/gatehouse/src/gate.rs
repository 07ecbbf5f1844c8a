//! Access gate orchestrator.
//!
//! Decides on mount whether the visitor is already verified. If not, it
//! mounts the challenge flow and, outside production builds with a secret
//! configured, the bypass panel. Both paths report success through one
//! shared [`VerifiedSignal`].

use gatehouse_common::{GateError, Theme};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::attempts::{AccessLogger, AttemptLimiter, BurstLimiter};
use crate::bypass::{self, BypassCredential, BypassDeps, BypassPanel, BypassView};
use crate::challenge::{
    ChallengeDeps, ChallengeFlow, ChallengeTimings, ChallengeView, ChallengeWidget, ProofSource,
    SubmitOutcome,
};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::scope::lock;
use crate::session::SessionManager;
use crate::store::{GateRepository, LimiterPath, LogStream};

type Callback = Box<dyn FnOnce() + Send>;

/// Fire-once notification towards the gated content
pub struct VerifiedSignal {
    callback: Mutex<Option<Callback>>,
    fired: AtomicBool,
}

impl VerifiedSignal {
    pub fn new(on_verified: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Mutex::new(Some(Box::new(on_verified))),
            fired: AtomicBool::new(false),
        }
    }

    /// Notify the parent; returns false if it was already notified
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        let callback = lock(&self.callback).take();
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Snapshot of a mounted gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateView {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass: Option<BypassView>,
}

/// One mounted gate for one client
pub struct AccessGate {
    session: SessionManager,
    signal: Arc<VerifiedSignal>,
    challenge: Option<ChallengeFlow>,
    bypass: Option<BypassPanel>,
}

impl AccessGate {
    pub async fn mount(
        config: &AppConfig,
        repo: GateRepository,
        clock: Arc<dyn Clock>,
        theme: watch::Receiver<Theme>,
        on_verified: impl FnOnce() + Send + 'static,
    ) -> Self {
        let signal = Arc::new(VerifiedSignal::new(on_verified));
        let session = SessionManager::new(repo.clone(), config.session_policy(), clock.clone());
        let logger = AccessLogger::new(repo.clone(), clock.clone(), config.build_mode, Map::new());

        let mut gate = Self {
            session: session.clone(),
            signal: signal.clone(),
            challenge: None,
            bypass: None,
        };

        let verified = session.is_valid().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Session check failed, showing challenge");
            false
        });
        if verified {
            tracing::info!("✅ Remembered verification, gate open");
            signal.fire();
            return gate;
        }

        let challenge_limiter = AttemptLimiter::new(
            repo.clone(),
            LimiterPath::Challenge,
            config.challenge.block_policy(),
            clock.clone(),
        );

        let widget = ChallengeWidget::new(config.challenge.site_key.clone(), theme);
        let deps = ChallengeDeps {
            limiter: challenge_limiter.clone(),
            session: session.clone(),
            logger: logger.clone(),
            signal: signal.clone(),
        };
        gate.challenge =
            Some(ChallengeFlow::mount(widget, deps, ChallengeTimings::from(&config.challenge)).await);

        let credential = BypassCredential::new(config.bypass.secret.clone());
        if bypass::is_enabled(config.build_mode, &credential) {
            let deps = BypassDeps {
                repo: repo.clone(),
                limiter: AttemptLimiter::new(
                    repo.clone(),
                    LimiterPath::Bypass,
                    config.bypass.block_policy(),
                    clock.clone(),
                ),
                burst: BurstLimiter::new(
                    repo.clone(),
                    LogStream::Bypass,
                    config.bypass.burst_policy(),
                    clock.clone(),
                ),
                challenge_limiter,
                session,
                logger,
                signal,
                clock,
            };
            gate.bypass =
                Some(BypassPanel::mount(credential, deps, config.bypass.message_reset()).await);
        }

        gate
    }

    pub fn is_verified(&self) -> bool {
        self.signal.is_fired()
    }

    /// A verified gate whose session has since expired or vanished
    ///
    /// Applies the lazy expiry, so stale keys are removed here.
    pub async fn is_stale(&self) -> bool {
        if !self.is_verified() {
            return false;
        }

        match self.session.is_valid().await {
            Ok(valid) => !valid,
            Err(e) => {
                tracing::warn!(error = %e, "Session re-check failed, keeping gate");
                false
            }
        }
    }

    pub fn view(&self) -> GateView {
        if self.is_verified() {
            return GateView {
                verified: true,
                challenge: None,
                bypass: None,
            };
        }

        GateView {
            verified: false,
            challenge: self.challenge.as_ref().map(ChallengeFlow::view),
            bypass: self.bypass.as_ref().map(BypassPanel::view),
        }
    }

    pub async fn submit_challenge(
        &self,
        proof: &dyn ProofSource,
        context: &Map<String, Value>,
    ) -> Result<SubmitOutcome, GateError> {
        if self.is_verified() {
            return Ok(SubmitOutcome::AlreadyVerified);
        }
        match &self.challenge {
            Some(flow) => flow.submit(proof, context).await,
            None => Ok(SubmitOutcome::AlreadyVerified),
        }
    }

    pub async fn submit_bypass(
        &self,
        password: &str,
        context: &Map<String, Value>,
    ) -> Result<SubmitOutcome, GateError> {
        if self.is_verified() {
            return Ok(SubmitOutcome::AlreadyVerified);
        }
        let Some(panel) = &self.bypass else {
            return Err(GateError::BypassDisabled);
        };

        panel.set_input(password);
        panel.submit(context).await
    }

    /// Unmount: cancel timers and any verification still in flight
    ///
    /// Requests already holding the gate finish against a closed scope.
    pub fn close(&self) {
        if let Some(flow) = &self.challenge {
            flow.close();
        }
        if let Some(panel) = &self.bypass {
            panel.close();
        }
    }
}
