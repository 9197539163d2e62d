//! Agent lifecycle states as observed through the real-time transport.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Participant attribute LiveKit agents use to publish their state.
pub const AGENT_STATE_ATTRIBUTE: &str = "lk.agent.state";

/// Discrete phase of an agent session.
///
/// Exactly one value is current per session. `Listening`, `Speaking` and
/// `Processing` are the active states; the other two mean no conversation is
/// under way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentLifecycleState {
    /// No transport, no credential
    #[default]
    Disconnected,
    /// Credential requested or transport open but the agent has not shown up yet
    Connecting,
    /// Agent is waiting for the user to speak
    Listening,
    /// Agent is talking
    Speaking,
    /// Agent is thinking about a reply
    Processing,
}

impl AgentLifecycleState {
    /// Whether a conversation is actually taking place in this state.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Listening | Self::Speaking | Self::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
            Self::Processing => "processing",
        }
    }

    /// Map the value of the `lk.agent.state` attribute onto a lifecycle state.
    ///
    /// An agent that is still `initializing` or `idle` has not started talking
    /// to us yet, so it still counts as connecting. Unknown values yield `None`
    /// and are ignored by the transport.
    pub fn from_agent_attribute(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "initializing" | "idle" | "connecting" => Some(Self::Connecting),
            "listening" => Some(Self::Listening),
            "thinking" | "processing" => Some(Self::Processing),
            "speaking" => Some(Self::Speaking),
            "disconnected" => Some(Self::Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for AgentLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
