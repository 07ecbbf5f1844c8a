//! Lifetime-bound scheduled tasks.
//!
//! UI-style timers (auto-dismiss an error, clear a message) are spawned
//! through a `TaskScope` owned by the component they act on. Closing the
//! scope (explicitly on unmount, or by dropping it) aborts whatever is
//! still pending and interrupts delays awaited through `run`.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct TaskScope {
    handles: Mutex<Vec<JoinHandle<()>>>,
    closed: watch::Sender<bool>,
}

impl Default for TaskScope {
    fn default() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            closed: watch::Sender::new(false),
        }
    }
}

impl TaskScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` after `delay` unless the scope is closed first
    pub fn spawn_after<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            return;
        }

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });

        let mut handles = lock(&self.handles);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Drive `fut` to completion; `None` if the scope closes first
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return None;
        }

        tokio::select! {
            output = fut => Some(output),
            _ = closed.wait_for(|closed| *closed) => None,
        }
    }

    /// Tasks spawned and not yet finished
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        lock(&self.handles).iter().filter(|h| !h.is_finished()).count()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Abort pending tasks and interrupt running delays
    pub fn close(&self) {
        self.closed.send_replace(true);
        for handle in lock(&self.handles).drain(..) {
            handle.abort();
        }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.close();
    }
}

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
