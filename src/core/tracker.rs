//! Agent state tracking.
//!
//! [`AgentStateTracker`] drains the event stream of one transport connection on
//! a background task and republishes it, in order, to a single callback. The
//! initial state is published first. Only the most recent state is kept.
//!
//! Every callback runs while holding the tracker's liveness gate, and
//! [`detach`](AgentStateTracker::detach) takes that gate to flip it. Once
//! `detach` returns, no callback is running and none will run again. The gate
//! is reentrant so a callback may detach its own tracker.

use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::core::agent_state::AgentLifecycleState;
use crate::core::transport::TransportEvent;

/// Callback invoked for every event the tracker publishes.
pub type TrackerCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

struct Gate {
    live: ReentrantMutex<Cell<bool>>,
}

impl Gate {
    fn new() -> Self {
        Self {
            live: ReentrantMutex::new(Cell::new(true)),
        }
    }

    /// Run `f` only while the gate is open, keeping it held for the duration.
    fn run_if_live(&self, f: impl FnOnce()) -> bool {
        let guard = self.live.lock();
        if !guard.get() {
            return false;
        }
        f();
        true
    }

    fn close(&self) {
        self.live.lock().set(false);
    }
}

/// Republishes lifecycle states from one transport connection.
pub struct AgentStateTracker {
    latest: Arc<Mutex<AgentLifecycleState>>,
    gate: Arc<Gate>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AgentStateTracker {
    /// Start draining `events`, publishing `initial_state` first.
    pub fn attach(
        initial_state: AgentLifecycleState,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        callback: TrackerCallback,
    ) -> Self {
        let latest = Arc::new(Mutex::new(initial_state));
        let gate = Arc::new(Gate::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let latest = Arc::clone(&latest);
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            async move {
                let publish = |event: TransportEvent| {
                    gate.run_if_live(|| {
                        match &event {
                            TransportEvent::StateChanged(state) => *latest.lock() = *state,
                            TransportEvent::Disconnected { .. } | TransportEvent::Failure(_) => {
                                *latest.lock() = AgentLifecycleState::Disconnected
                            }
                        }
                        callback(event);
                    })
                };

                if !publish(TransportEvent::StateChanged(initial_state)) {
                    return;
                }

                loop {
                    let event = tokio::select! {
                        () = cancel.cancelled() => break,
                        event = events.recv() => event,
                    };
                    let Some(event) = event else {
                        debug!("transport event stream closed");
                        break;
                    };
                    let terminal = !matches!(event, TransportEvent::StateChanged(_));
                    if !publish(event) || terminal {
                        break;
                    }
                }
            }
            .instrument(info_span!("agent_state_tracker"))
        });

        Self {
            latest,
            gate,
            cancel,
            task: Some(task),
        }
    }

    /// Most recent state published, or `Disconnected` once detached.
    pub fn current(&self) -> AgentLifecycleState {
        *self.latest.lock()
    }

    /// Stop publishing. No callback runs after this returns.
    pub fn detach(&mut self) {
        self.gate.close();
        self.cancel.cancel();
        *self.latest.lock() = AgentLifecycleState::Disconnected;
        self.task.take();
    }
}

impl Drop for AgentStateTracker {
    fn drop(&mut self) {
        self.gate.close();
        self.cancel.cancel();
    }
}
