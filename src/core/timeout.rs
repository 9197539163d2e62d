//! Connection timeout watcher.
//!
//! Arming starts a countdown on a background task; disarming cancels it.
//! Re-arming replaces the pending countdown, so at most one is ever live.
//! The expiry callback runs only if its countdown is still the current one when
//! the timer fires, so a disarm that lands first always wins.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

/// Default time to wait for an agent before raising the no-agent notice.
pub const DEFAULT_NO_AGENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct WatcherState {
    generation: u64,
    armed: Option<CancellationToken>,
}

/// Single-shot, replaceable countdown.
#[derive(Clone, Default)]
pub struct TimeoutWatcher {
    state: Arc<Mutex<WatcherState>>,
}

impl TimeoutWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a countdown of `timeout`, replacing any pending one.
    pub fn arm<F>(&self, timeout: Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let generation = {
            let mut state = self.state.lock();
            if let Some(previous) = state.armed.replace(cancel.clone()) {
                previous.cancel();
            }
            state.generation += 1;
            state.generation
        };

        let state = Arc::clone(&self.state);
        tokio::spawn(
            async move {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(timeout) => {}
                }

                {
                    let mut state = state.lock();
                    if state.generation != generation || state.armed.is_none() {
                        return;
                    }
                    state.armed = None;
                }

                debug!(timeout_ms = timeout.as_millis() as u64, "timeout expired");
                on_expire();
            }
            .instrument(info_span!("timeout_watcher")),
        );
    }

    /// Cancel the pending countdown, if any.
    pub fn disarm(&self) {
        let mut state = self.state.lock();
        if let Some(cancel) = state.armed.take() {
            cancel.cancel();
        }
        state.generation += 1;
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().armed.is_some()
    }
}

impl std::fmt::Debug for TimeoutWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutWatcher")
            .field("armed", &self.is_armed())
            .finish()
    }
}
