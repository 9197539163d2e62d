//! Real-time transport boundary.
//!
//! The session logic only needs four things from the media SDK: open a session
//! from a credential, observe agent state changes, notice disconnection, and
//! close the session. [`Transport`] captures exactly that; [`livekit`] provides
//! the LiveKit room implementation used in production.
//!
//! Events of one connection travel through a single unbounded channel, so they
//! reach the session in the order the transport observed them.

pub mod livekit;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::agent_state::AgentLifecycleState;
use crate::core::credentials::ConnectionCredential;

pub use self::livekit::LiveKitTransport;

/// Transport-level failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The session could not be opened
    #[error("Connection failed: {0}")]
    Connect(String),

    /// An open session dropped because of the network or the server
    #[error("Connection lost: {0}")]
    Lost(String),

    /// Media stream or device problem
    #[error("Media device failure: {0}")]
    Media(String),

    /// Closing the session failed
    #[error("Close failed: {0}")]
    Closed(String),
}

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The remote agent moved to a new lifecycle state
    StateChanged(AgentLifecycleState),
    /// The session ended on the transport side
    Disconnected { reason: Option<String> },
    /// The session broke
    Failure(TransportError),
}

/// Handle used to close an open connection.
#[async_trait]
pub trait TransportControl: Send + Sync {
    async fn close(&self) -> Result<(), TransportError>;
}

/// An open transport session.
pub struct TransportConnection {
    /// State observed at the moment the connection was opened
    pub initial_state: AgentLifecycleState,
    /// Ordered stream of everything observed afterwards
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub control: Arc<dyn TransportControl>,
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection")
            .field("initial_state", &self.initial_state)
            .finish_non_exhaustive()
    }
}

/// Opens real-time sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        credential: &ConnectionCredential,
    ) -> Result<TransportConnection, TransportError>;
}
