pub mod agent_state;
pub mod coordinator;
pub mod credentials;
pub mod iteration;
pub mod session;
pub mod timeout;
pub mod tracker;
pub mod transport;

// Re-export commonly used types for convenience
pub use agent_state::{AGENT_STATE_ATTRIBUTE, AgentLifecycleState};
pub use coordinator::{
    CoordinatorError, CoordinatorEvent, CoordinatorOptions, DelayFeedbackProcessor,
    DualAgentCoordinator, FeedbackProcessingError, FeedbackProcessor, FeedbackRequest,
};
pub use credentials::{
    ConnectionCredential, ConnectionDetails, ConnectionDetailsProvider, CredentialFetchError,
    CredentialRequest, HttpConnectionDetailsProvider,
};
pub use iteration::{FeedbackIterationFlow, IterationDecision, IterationRecord};
pub use session::{
    SessionError, SessionEvent, SessionOptions, SessionResult, SessionView, SingleAgentSession,
};
pub use timeout::TimeoutWatcher;
pub use tracker::{AgentStateTracker, TrackerCallback};
pub use transport::{
    LiveKitTransport, Transport, TransportConnection, TransportControl, TransportError,
    TransportEvent,
};
