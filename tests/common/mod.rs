//! Shared test doubles for session and coordinator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use voice_agent_studio::{
    AgentLifecycleState, ConnectionCredential, ConnectionDetailsProvider, CredentialFetchError,
    CredentialRequest, Transport, TransportConnection, TransportControl, TransportError,
    TransportEvent,
};

/// Let spawned tasks run; the clock is paused in these tests.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn credential(session_id: &str) -> ConnectionCredential {
    credential_with_ttl(session_id, Duration::from_secs(900))
}

pub fn credential_with_ttl(session_id: &str, ttl: Duration) -> ConnectionCredential {
    ConnectionCredential::new("wss://example.livekit.cloud", session_id, "user_42", "token", ttl)
}

/// Provider that records requests and answers from a script.
#[derive(Default)]
pub struct MockProvider {
    requests: Mutex<Vec<CredentialRequest>>,
    failure: Mutex<Option<u16>>,
    delay: Mutex<Option<Duration>>,
    ttl: Mutex<Option<Duration>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer every following request with this HTTP status.
    pub fn fail_with_status(&self, status: u16) {
        *self.failure.lock() = Some(status);
    }

    pub fn succeed(&self) {
        *self.failure.lock() = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Lifetime of the credentials handed out from now on.
    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.lock() = Some(ttl);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<CredentialRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ConnectionDetailsProvider for MockProvider {
    async fn fetch(
        &self,
        request: &CredentialRequest,
    ) -> Result<ConnectionCredential, CredentialFetchError> {
        let count = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len()
        };

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = *self.failure.lock();
        let ttl = self.ttl.lock().unwrap_or(Duration::from_secs(900));
        match failure {
            Some(status) => Err(CredentialFetchError::Status {
                status,
                body: "boom".to_string(),
            }),
            None => Ok(credential_with_ttl(
                &format!(
                    "{}_{}_room_{count}",
                    request.display_name.to_lowercase(),
                    request.purpose
                ),
                ttl,
            )),
        }
    }
}

/// Control handle that counts closes.
#[derive(Default)]
pub struct MockControl {
    closes: AtomicUsize,
}

impl MockControl {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportControl for MockControl {
    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One opened connection: the test drives it through `events`.
#[derive(Clone)]
pub struct OpenedConnection {
    pub credential: ConnectionCredential,
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub control: Arc<MockControl>,
}

impl OpenedConnection {
    pub fn emit(&self, state: AgentLifecycleState) {
        let _ = self.events.send(TransportEvent::StateChanged(state));
    }

    pub fn send(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

/// Channel-backed transport.
pub struct MockTransport {
    initial_state: Mutex<AgentLifecycleState>,
    failure: Mutex<Option<TransportError>>,
    opened: Mutex<Vec<OpenedConnection>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            initial_state: Mutex::new(AgentLifecycleState::Connecting),
            failure: Mutex::new(None),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn set_initial_state(&self, state: AgentLifecycleState) {
        *self.initial_state.lock() = state;
    }

    pub fn fail_with(&self, error: TransportError) {
        *self.failure.lock() = Some(error);
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// Most recently opened connection.
    pub fn last(&self) -> OpenedConnection {
        self.opened
            .lock()
            .last()
            .cloned()
            .expect("no connection opened yet")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        credential: &ConnectionCredential,
    ) -> Result<TransportConnection, TransportError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let control = Arc::new(MockControl::default());
        self.opened.lock().push(OpenedConnection {
            credential: credential.clone(),
            events: tx,
            control: Arc::clone(&control),
        });

        Ok(TransportConnection {
            initial_state: *self.initial_state.lock(),
            events: rx,
            control,
        })
    }
}
