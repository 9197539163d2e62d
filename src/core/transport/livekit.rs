//! LiveKit room transport.
//!
//! Joins the room named by the credential and follows the agent through the
//! `lk.agent.state` participant attribute that LiveKit agents publish. A room
//! without an agent reports [`AgentLifecycleState::Connecting`]; the agent
//! leaving the room puts the session back into that state.
//!
//! Room disconnections caused by the network or the server surface as
//! [`TransportEvent::Failure`]; hangups and closed rooms are plain
//! [`TransportEvent::Disconnected`].

use async_trait::async_trait;
use livekit::DisconnectReason as RoomDisconnectReason;
use livekit::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Transport, TransportConnection, TransportControl, TransportError, TransportEvent};
use crate::core::agent_state::{AGENT_STATE_ATTRIBUTE, AgentLifecycleState};
use crate::core::credentials::ConnectionCredential;

/// Opens sessions as LiveKit rooms.
#[derive(Debug, Clone, Default)]
pub struct LiveKitTransport;

impl LiveKitTransport {
    pub fn new() -> Self {
        Self
    }
}

fn disconnect_event(reason: RoomDisconnectReason) -> TransportEvent {
    let name = reason.as_str_name().to_lowercase();
    match reason {
        RoomDisconnectReason::MediaFailure => TransportEvent::Failure(TransportError::Media(name)),
        RoomDisconnectReason::JoinFailure
        | RoomDisconnectReason::SignalClose
        | RoomDisconnectReason::ServerShutdown
        | RoomDisconnectReason::ConnectionTimeout
        | RoomDisconnectReason::StateMismatch
        | RoomDisconnectReason::DuplicateIdentity
        | RoomDisconnectReason::Migration => TransportEvent::Failure(TransportError::Lost(name)),
        _ => TransportEvent::Disconnected { reason: Some(name) },
    }
}

fn agent_state_of(attributes: &HashMap<String, String>) -> Option<AgentLifecycleState> {
    attributes
        .get(AGENT_STATE_ATTRIBUTE)
        .and_then(|value| AgentLifecycleState::from_agent_attribute(value))
}

#[async_trait]
impl Transport for LiveKitTransport {
    async fn open(
        &self,
        credential: &ConnectionCredential,
    ) -> Result<TransportConnection, TransportError> {
        let (room, mut room_events) =
            Room::connect(&credential.server_address, credential.token(), RoomOptions::default())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!(
            room = %credential.session_id,
            participant = %credential.participant_id,
            "joined LiveKit room"
        );

        // An agent may already be in the room when we join.
        let mut agent_identity = None;
        let mut initial_state = AgentLifecycleState::Connecting;
        for (identity, participant) in room.remote_participants() {
            if let Some(state) = agent_state_of(&participant.attributes()) {
                agent_identity = Some(identity);
                initial_state = state;
                break;
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let room = Arc::new(room);
        let session_id = credential.session_id.clone();

        tokio::spawn(async move {
            while let Some(event) = room_events.recv().await {
                let forwarded = match event {
                    RoomEvent::ParticipantConnected(participant) => {
                        agent_state_of(&participant.attributes()).map(|state| {
                            agent_identity = Some(participant.identity());
                            TransportEvent::StateChanged(state)
                        })
                    }
                    RoomEvent::ParticipantAttributesChanged {
                        participant,
                        changed_attributes,
                    } => agent_state_of(&changed_attributes).map(|state| {
                        agent_identity = Some(participant.identity());
                        TransportEvent::StateChanged(state)
                    }),
                    RoomEvent::ParticipantDisconnected(participant)
                        if agent_identity.as_ref() == Some(&participant.identity()) =>
                    {
                        debug!(room = %session_id, "agent left the room");
                        agent_identity = None;
                        Some(TransportEvent::StateChanged(AgentLifecycleState::Connecting))
                    }
                    RoomEvent::Disconnected { reason } => {
                        let event = disconnect_event(reason);
                        if matches!(event, TransportEvent::Failure(_)) {
                            warn!(room = %session_id, ?reason, "LiveKit room connection lost");
                        }
                        let _ = tx.send(event);
                        break;
                    }
                    _ => None,
                };

                if let Some(event) = forwarded {
                    if tx.send(event).is_err() {
                        // Nobody is listening any more.
                        break;
                    }
                }
            }
            debug!(room = %session_id, "room event pump finished");
        });

        Ok(TransportConnection {
            initial_state,
            events: rx,
            control: Arc::new(LiveKitControl { room }),
        })
    }
}

struct LiveKitControl {
    room: Arc<Room>,
}

#[async_trait]
impl TransportControl for LiveKitControl {
    async fn close(&self) -> Result<(), TransportError> {
        self.room.close().await.map_err(|e| {
            warn!("failed to close LiveKit room: {e}");
            TransportError::Closed(e.to_string())
        })
    }
}
