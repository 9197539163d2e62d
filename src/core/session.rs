//! Single agent session.
//!
//! [`SingleAgentSession`] puts credential acquisition, the transport, state
//! tracking and the no-agent timeout together into one unit that can be
//! connected and disconnected.
//!
//! # State machine
//!
//! ```text
//! Disconnected --connect()--> Connecting --transport active--> Listening | Speaking | Processing
//!      ^                          |                                       |
//!      +---- fetch/open failure --+                                       |
//!      +------------- disconnect() / transport disconnect or failure -----+
//! ```
//!
//! Every connect attempt gets a new epoch. Transport callbacks, credential
//! responses and timer expiries carry the epoch they were started under and are
//! dropped when it no longer matches, so nothing from a torn-down attempt can
//! touch the current view.
//!
//! Internal locks are never held across an `.await`, and the tracker is
//! always detached after the session lock has been released.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::agent_state::AgentLifecycleState;
use crate::core::credentials::{
    ConnectionCredential, ConnectionDetailsProvider, CredentialFetchError, CredentialRequest,
};
use crate::core::timeout::{DEFAULT_NO_AGENT_TIMEOUT, TimeoutWatcher};
use crate::core::tracker::{AgentStateTracker, TrackerCallback};
use crate::core::transport::{
    Transport, TransportConnection, TransportControl, TransportError, TransportEvent,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Errors returned from [`SingleAgentSession::connect`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Credential(#[from] CredentialFetchError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Assistant display name sent to the credential endpoint
    pub display_name: String,
    /// Purpose tag sent to the credential endpoint
    pub purpose: String,
    /// How long to wait in `Connecting` before raising the no-agent notice
    pub no_agent_timeout: Duration,
    /// Connect as soon as the session is mounted
    pub auto_connect: bool,
}

impl SessionOptions {
    pub fn new(display_name: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            purpose: purpose.into(),
            no_agent_timeout: DEFAULT_NO_AGENT_TIMEOUT,
            auto_connect: false,
        }
    }

    pub fn with_no_agent_timeout(mut self, timeout: Duration) -> Self {
        self.no_agent_timeout = timeout;
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }
}

/// What the owning view sees of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    pub credential: Option<ConnectionCredential>,
    pub state: AgentLifecycleState,
    /// Latched the first time the agent reaches an active state
    pub has_ever_connected: bool,
    /// When an active state was last observed
    pub last_active_at: Option<Instant>,
    /// The no-agent notice is showing
    pub no_agent_notice: bool,
}

/// Notifications published by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        from: AgentLifecycleState,
        to: AgentLifecycleState,
        at: Instant,
        /// Last active timestamp as it stood when the transition happened
        last_active_at: Option<Instant>,
    },
    /// The agent did not show up before the timeout
    NoAgent,
    CredentialFetchFailed(String),
    TransportFailed(TransportError),
}

struct SessionInner {
    view: SessionView,
    epoch: u64,
    tracker: Option<AgentStateTracker>,
    control: Option<Arc<dyn TransportControl>>,
}

/// Resources taken out of a session during teardown, released once the
/// session lock is gone.
struct Released {
    tracker: Option<AgentStateTracker>,
    control: Option<Arc<dyn TransportControl>>,
}

impl Released {
    async fn close(mut self, session: &str) {
        if let Some(mut tracker) = self.tracker.take() {
            tracker.detach();
        }
        if let Some(control) = self.control.take() {
            if let Err(e) = control.close().await {
                warn!(session, "failed to close transport: {e}");
            }
        }
    }

    fn close_in_background(mut self, session: String) {
        if let Some(mut tracker) = self.tracker.take() {
            tracker.detach();
        }
        if let Some(control) = self.control.take() {
            tokio::spawn(async move {
                if let Err(e) = control.close().await {
                    warn!(session, "failed to close transport: {e}");
                }
            });
        }
    }
}

struct SessionShared {
    options: SessionOptions,
    provider: Arc<dyn ConnectionDetailsProvider>,
    transport: Arc<dyn Transport>,
    inner: Mutex<SessionInner>,
    watcher: TimeoutWatcher,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionShared {
    fn name(&self) -> &str {
        &self.options.display_name
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, inner: &mut SessionInner, to: AgentLifecycleState) {
        let at = Instant::now();
        if to.is_active() {
            inner.view.last_active_at = Some(at);
        }

        let from = inner.view.state;
        if from == to {
            return;
        }
        inner.view.state = to;

        debug!(session = %self.name(), epoch = inner.epoch, %from, %to, "agent state changed");
        self.publish(SessionEvent::StateChanged {
            from,
            to,
            at,
            last_active_at: inner.view.last_active_at,
        });
    }

    fn arm_no_agent_timer(self: &Arc<Self>, epoch: u64) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.watcher.arm(self.options.no_agent_timeout, move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_no_agent_timeout(epoch);
            }
        });
    }

    fn on_no_agent_timeout(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        // Checked at fire time, not arm time.
        if inner.epoch != epoch
            || inner.view.state != AgentLifecycleState::Connecting
            || inner.view.has_ever_connected
        {
            debug!(session = %self.name(), epoch, "stale no-agent timeout ignored");
            return;
        }

        inner.view.no_agent_notice = true;
        warn!(
            session = %self.name(),
            timeout_ms = self.options.no_agent_timeout.as_millis() as u64,
            "no agent joined the session, is the agent running?"
        );
        self.publish(SessionEvent::NoAgent);
    }

    /// Reset to `Disconnected` and hand back whatever must be released.
    fn teardown(&self, inner: &mut SessionInner) -> Released {
        inner.epoch += 1;
        self.watcher.disarm();

        let released = Released {
            tracker: inner.tracker.take(),
            control: inner.control.take(),
        };

        self.set_state(inner, AgentLifecycleState::Disconnected);
        inner.view = SessionView::default();
        released
    }

    /// Give up on attempt `epoch` after a failure, if it is still current.
    fn abort_attempt(&self, epoch: u64, event: SessionEvent) -> Option<Released> {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return None;
        }
        let released = self.teardown(&mut inner);
        self.publish(event);
        Some(released)
    }

    /// Single entry point for everything the transport reports.
    fn apply_external_state(self: &Arc<Self>, epoch: u64, event: TransportEvent) {
        let released = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || inner.view.state == AgentLifecycleState::Disconnected {
                debug!(session = %self.name(), epoch, ?event, "dropping stale transport event");
                return;
            }

            match event {
                TransportEvent::StateChanged(AgentLifecycleState::Disconnected) => {
                    info!(session = %self.name(), "agent reported disconnection");
                    Some(self.teardown(&mut inner))
                }
                TransportEvent::StateChanged(AgentLifecycleState::Connecting) => {
                    if inner.view.state != AgentLifecycleState::Connecting {
                        self.set_state(&mut inner, AgentLifecycleState::Connecting);
                        self.arm_no_agent_timer(epoch);
                    }
                    None
                }
                TransportEvent::StateChanged(state) => {
                    self.watcher.disarm();
                    if !inner.view.has_ever_connected {
                        info!(session = %self.name(), %state, "agent connected");
                    }
                    inner.view.has_ever_connected = true;
                    inner.view.no_agent_notice = false;
                    self.set_state(&mut inner, state);
                    None
                }
                TransportEvent::Disconnected { reason } => {
                    info!(session = %self.name(), reason = ?reason, "transport disconnected");
                    Some(self.teardown(&mut inner))
                }
                TransportEvent::Failure(err) => {
                    error!(session = %self.name(), "transport failure: {err}");
                    let released = self.teardown(&mut inner);
                    self.publish(SessionEvent::TransportFailed(err));
                    Some(released)
                }
            }
        };

        if let Some(released) = released {
            released.close_in_background(self.name().to_string());
        }
    }
}

/// One connect/disconnect-able conversation with one agent.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SingleAgentSession {
    shared: Arc<SessionShared>,
}

impl SingleAgentSession {
    pub fn new(
        options: SessionOptions,
        provider: Arc<dyn ConnectionDetailsProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(SessionShared {
                options,
                provider,
                transport,
                inner: Mutex::new(SessionInner {
                    view: SessionView::default(),
                    epoch: 0,
                    tracker: None,
                    control: None,
                }),
                watcher: TimeoutWatcher::new(),
                events,
            }),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> SessionView {
        self.shared.inner.lock().view.clone()
    }

    pub fn state(&self) -> AgentLifecycleState {
        self.shared.inner.lock().view.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Hide the no-agent notice. Session state is untouched.
    pub fn dismiss_notice(&self) {
        self.shared.inner.lock().view.no_agent_notice = false;
    }

    /// Connect if the session was configured to connect on mount.
    pub async fn mount(&self) -> SessionResult<()> {
        if self.shared.options.auto_connect {
            self.connect().await
        } else {
            Ok(())
        }
    }

    pub async fn unmount(&self) {
        self.disconnect().await;
    }

    /// Request a fresh credential and open the transport.
    ///
    /// Does nothing unless the session is `Disconnected`, so a second call
    /// while connecting or connected never issues another credential request.
    /// Failures put the session back into `Disconnected`, are published as
    /// events and are returned to the caller.
    pub async fn connect(&self) -> SessionResult<()> {
        let shared = &self.shared;

        let epoch = {
            let mut inner = shared.inner.lock();
            if inner.view.state != AgentLifecycleState::Disconnected {
                debug!(session = %shared.name(), state = %inner.view.state, "connect ignored");
                return Ok(());
            }
            inner.epoch += 1;
            let epoch = inner.epoch;
            shared.set_state(&mut inner, AgentLifecycleState::Connecting);
            shared.arm_no_agent_timer(epoch);
            epoch
        };

        info!(
            session = %shared.name(),
            purpose = %shared.options.purpose,
            epoch,
            "connecting to agent"
        );

        let request = CredentialRequest::new(&shared.options.display_name, &shared.options.purpose);
        let credential = match shared.provider.fetch(&request).await {
            Ok(credential) => credential,
            Err(err) => {
                warn!(session = %shared.name(), "failed to fetch connection details: {err}");
                if let Some(released) =
                    shared.abort_attempt(epoch, SessionEvent::CredentialFetchFailed(err.to_string()))
                {
                    released.close(shared.name()).await;
                }
                return Err(err.into());
            }
        };

        {
            let mut inner = shared.inner.lock();
            if inner.epoch != epoch {
                debug!(session = %shared.name(), epoch, "attempt superseded during credential fetch");
                return Ok(());
            }
            inner.view.credential = Some(credential.clone());
        }

        if credential.is_expired() {
            let err = TransportError::Connect("connection credential expired".to_string());
            warn!(session = %shared.name(), room = %credential.session_id, "{err}");
            if let Some(released) =
                shared.abort_attempt(epoch, SessionEvent::TransportFailed(err.clone()))
            {
                released.close(shared.name()).await;
            }
            return Err(err.into());
        }

        let TransportConnection {
            initial_state,
            events,
            control,
        } = match shared.transport.open(&credential).await {
            Ok(connection) => connection,
            Err(err) => {
                error!(session = %shared.name(), "failed to open transport: {err}");
                if let Some(released) =
                    shared.abort_attempt(epoch, SessionEvent::TransportFailed(err.clone()))
                {
                    released.close(shared.name()).await;
                }
                return Err(err.into());
            }
        };

        let orphaned = {
            let mut inner = shared.inner.lock();
            if inner.epoch != epoch {
                Some(control)
            } else {
                let weak = Arc::downgrade(shared);
                let callback: TrackerCallback = Arc::new(move |event| {
                    if let Some(shared) = weak.upgrade() {
                        shared.apply_external_state(epoch, event);
                    }
                });
                inner.control = Some(control);
                inner.tracker = Some(AgentStateTracker::attach(initial_state, events, callback));
                None
            }
        };

        if let Some(control) = orphaned {
            debug!(session = %shared.name(), epoch, "attempt superseded while opening transport");
            if let Err(e) = control.close().await {
                warn!(session = %shared.name(), "failed to close transport: {e}");
            }
        }

        Ok(())
    }

    /// Tear the session down, whatever state it is in.
    ///
    /// Afterwards the view is `{credential: None, state: Disconnected,
    /// has_ever_connected: false}` and no stale callback can change it.
    pub async fn disconnect(&self) {
        let released = {
            let mut inner = self.shared.inner.lock();
            if inner.view.state != AgentLifecycleState::Disconnected {
                info!(session = %self.shared.name(), "disconnecting");
            }
            self.shared.teardown(&mut inner)
        };
        released.close(self.shared.name()).await;
    }
}

impl std::fmt::Debug for SingleAgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleAgentSession")
            .field("options", &self.shared.options)
            .field("view", &self.view())
            .finish()
    }
}
