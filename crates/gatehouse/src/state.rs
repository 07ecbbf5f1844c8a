//! Application state and shared resources.

use anyhow::Result;
use gatehouse_common::{AccessStats, GateError, Theme};
use serde_json::Map;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, watch};

use crate::attempts::AccessLogger;
use crate::bypass;
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::gate::AccessGate;
use crate::store::{GateRepository, KeyValueStore, MemoryStore, RedisStore, ScopedStore};

/// A mounted gate and when its client last touched it
struct Mounted {
    gate: Arc<AccessGate>,
    last_seen: AtomicI64,
}

impl Mounted {
    fn touch(&self, now: i64) {
        self.last_seen.fetch_max(now, Ordering::Relaxed);
    }

    fn last_seen(&self) -> i64 {
        self.last_seen.load(Ordering::Relaxed)
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Backing store shared by every client namespace
    pub store: Arc<dyn KeyValueStore>,

    pub clock: Arc<dyn Clock>,

    /// Mounted gates by client identity
    gates: Arc<RwLock<HashMap<String, Mounted>>>,

    /// Root theme signal followed by every challenge widget
    theme: Arc<watch::Sender<Theme>>,
}

impl AppState {
    /// Create new application state, connecting to Redis when configured
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisStore::connect(url).await?),
            None => {
                tracing::warn!("No Redis URL configured, gate state is kept in memory");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self::with_store(config, store, Arc::new(SystemClock)))
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let (theme, _) = watch::channel(Theme::default());

        Self {
            config: Arc::new(config),
            store,
            clock,
            gates: Arc::new(RwLock::new(HashMap::new())),
            theme: Arc::new(theme),
        }
    }

    /// Repository over one client's namespace
    pub fn repository(&self, client_id: &str) -> GateRepository {
        GateRepository::new(Arc::new(ScopedStore::for_client(self.store.clone(), client_id)))
    }

    fn namespace(&self, client_id: &str) -> String {
        ScopedStore::for_client(self.store.clone(), client_id)
            .prefix()
            .to_string()
    }

    /// The client's mounted gate, mounting one if needed
    ///
    /// A gate whose remembered verification has expired is replaced by a
    /// fresh one showing the challenge again.
    pub async fn gate(&self, client_id: &str) -> Arc<AccessGate> {
        let now = self.clock.now_ms();

        let existing = self.gates.read().await.get(client_id).map(|mounted| {
            mounted.touch(now);
            mounted.gate.clone()
        });

        if let Some(gate) = existing {
            if !gate.is_stale().await {
                return gate;
            }

            tracing::info!(client = %self.namespace(client_id), "⏰ Verification expired, remounting gate");
            let mut gates = self.gates.write().await;
            if gates
                .get(client_id)
                .is_some_and(|mounted| Arc::ptr_eq(&mounted.gate, &gate))
            {
                gates.remove(client_id);
            }
            gate.close();
        }

        let namespace = self.namespace(client_id);
        let gate = AccessGate::mount(
            &self.config,
            self.repository(client_id),
            self.clock.clone(),
            self.theme.subscribe(),
            move || tracing::info!(client = %namespace, "🔓 Gate passed, content revealed"),
        )
        .await;

        let mut gates = self.gates.write().await;

        // A concurrent request may have mounted first; keep that one
        if let Some(mounted) = gates.get(client_id) {
            mounted.touch(now);
            gate.close();
            return mounted.gate.clone();
        }

        if gates.len() >= self.config.max_mounted_gates {
            let evicted = make_room(&mut gates, now - self.config.gate_idle_ms());
            tracing::warn!(evicted, cap = self.config.max_mounted_gates, "Gate cap reached");
        }

        let gate = Arc::new(gate);
        gates.insert(
            client_id.to_string(),
            Mounted {
                gate: gate.clone(),
                last_seen: AtomicI64::new(now),
            },
        );
        gate
    }

    /// Drop the client's gate, cancelling pending timers and any
    /// verification still in flight
    pub async fn unmount(&self, client_id: &str) -> bool {
        let removed = self.gates.write().await.remove(client_id);
        match removed {
            Some(mounted) => {
                mounted.gate.close();
                true
            }
            None => false,
        }
    }

    /// Unmount every gate idle for longer than the configured window
    pub async fn evict_idle(&self) -> usize {
        let cutoff = self.clock.now_ms() - self.config.gate_idle_ms();
        let mut gates = self.gates.write().await;
        evict_older_than(&mut gates, cutoff)
    }

    pub async fn mounted(&self) -> usize {
        self.gates.read().await.len()
    }

    /// Access statistics and bypass-session status, read straight from
    /// the client's namespace without mounting a gate
    pub async fn stats(&self, client_id: &str) -> Result<(AccessStats, bool), GateError> {
        let repo = self.repository(client_id);
        let logger = AccessLogger::new(
            repo.clone(),
            self.clock.clone(),
            self.config.build_mode,
            Map::new(),
        );

        let stats = logger.stats().await?;
        let bypass_session =
            bypass::is_valid_bypass_session(&repo, &self.config.session_policy(), self.clock.now_ms())
                .await?;
        Ok((stats, bypass_session))
    }

    pub fn theme(&self) -> Theme {
        *self.theme.borrow()
    }

    /// Update the root theme; mounted widgets re-render
    pub fn set_theme(&self, theme: Theme) {
        let changed = self.theme.send_if_modified(|current| {
            if *current == theme {
                false
            } else {
                *current = theme;
                true
            }
        });

        if changed {
            tracing::info!(theme = ?theme, "Theme updated");
        }
    }
}

/// Close and remove every gate last seen before `cutoff`
fn evict_older_than(gates: &mut HashMap<String, Mounted>, cutoff: i64) -> usize {
    let before = gates.len();
    gates.retain(|_, mounted| {
        let keep = mounted.last_seen() >= cutoff;
        if !keep {
            mounted.gate.close();
        }
        keep
    });
    before - gates.len()
}

/// Free one slot: idle gates go first, then the least recently seen
fn make_room(gates: &mut HashMap<String, Mounted>, cutoff: i64) -> usize {
    let evicted = evict_older_than(gates, cutoff);
    if evicted > 0 {
        return evicted;
    }

    let oldest = gates
        .iter()
        .min_by_key(|(_, mounted)| mounted.last_seen())
        .map(|(client, _)| client.clone());
    match oldest.and_then(|client| gates.remove(&client)) {
        Some(mounted) => {
            mounted.gate.close();
            1
        }
        None => 0,
    }
}

/// Background worker that unmounts idle gates
pub async fn gate_sweeper(
    state: AppState,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(every_secs = every.as_secs(), "🧹 Gate sweeper started");

    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = state.evict_idle().await;
                if evicted > 0 {
                    let mounted = state.mounted().await;
                    tracing::debug!(evicted, mounted, "Idle gates unmounted");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("🧹 Gate sweeper shutting down...");
                break;
            }
        }
    }
}
