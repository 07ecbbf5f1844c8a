//! Third-party puzzle widget wrapper.

use gatehouse_common::Theme;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::scope::lock;

/// What the client should render in the widget slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WidgetView {
    Ready {
        site_key: String,
        theme: Theme,
        /// Changes whenever the widget must be re-rendered
        render_key: u64,
    },
    Misconfigured {
        message: &'static str,
    },
}

/// Follows the root theme signal for as long as it is alive
///
/// The observer task is acquired in `spawn` and released on drop.
pub struct ThemeWatcher {
    current: Arc<Mutex<(Theme, u64)>>,
    task: JoinHandle<()>,
}

impl ThemeWatcher {
    pub fn spawn(mut rx: watch::Receiver<Theme>) -> Self {
        let initial = *rx.borrow_and_update();
        let current = Arc::new(Mutex::new((initial, 0)));

        let shared = current.clone();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let theme = *rx.borrow_and_update();
                let mut state = lock(&shared);
                if state.0 != theme {
                    state.0 = theme;
                    state.1 += 1;
                    tracing::debug!(theme = ?theme, render_key = state.1, "Challenge theme changed");
                }
            }
        });

        Self { current, task }
    }

    pub fn theme(&self) -> Theme {
        lock(&self.current).0
    }

    pub fn render_key(&self) -> u64 {
        lock(&self.current).1
    }

    #[cfg(test)]
    pub fn is_observing(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ThemeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Challenge widget slot
pub struct ChallengeWidget {
    site_key: Option<String>,
    theme: ThemeWatcher,
}

impl ChallengeWidget {
    pub fn new(site_key: Option<String>, theme: watch::Receiver<Theme>) -> Self {
        Self {
            site_key: site_key.filter(|k| !k.trim().is_empty()),
            theme: ThemeWatcher::spawn(theme),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.site_key.is_some()
    }

    pub fn view(&self) -> WidgetView {
        match &self.site_key {
            Some(site_key) => WidgetView::Ready {
                site_key: site_key.clone(),
                theme: self.theme.theme(),
                render_key: self.theme.render_key(),
            },
            None => WidgetView::Misconfigured {
                message: "Challenge site key missing",
            },
        }
    }

    #[cfg(test)]
    pub fn watcher(&self) -> &ThemeWatcher {
        &self.theme
    }
}
