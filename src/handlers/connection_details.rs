//! Credential endpoint.
//!
//! `GET /connection-details?assistant=<name>&type=<purpose>` mints a fresh
//! LiveKit access token for a new room on every call. Responses are never
//! cacheable since a credential belongs to exactly one connect attempt.

use axum::{
    Json,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use livekit_api::access_token::{AccessToken, VideoGrants};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::credentials::ConnectionDetails;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

pub const DEFAULT_ASSISTANT: &str = "default";
pub const DEFAULT_PURPOSE: &str = "landing";

/// Rooms and identities get a random suffix below this bound.
const NAME_SUFFIX_RANGE: u128 = 10_000;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectionDetailsQuery {
    pub assistant: Option<String>,
    #[serde(rename = "type")]
    pub purpose: Option<String>,
}

impl ConnectionDetailsQuery {
    fn assistant(&self) -> &str {
        non_empty(self.assistant.as_deref()).unwrap_or(DEFAULT_ASSISTANT)
    }

    fn purpose(&self) -> &str {
        non_empty(self.purpose.as_deref()).unwrap_or(DEFAULT_PURPOSE)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn random_suffix() -> u128 {
    Uuid::new_v4().as_u128() % NAME_SUFFIX_RANGE
}

pub fn participant_identity() -> String {
    format!("user_{}", random_suffix())
}

pub fn room_name(assistant: &str, purpose: &str) -> String {
    format!("{assistant}_{purpose}_room_{}", random_suffix())
}

/// Issue connection details for one connect attempt.
pub async fn connection_details(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectionDetailsQuery>,
) -> AppResult<Response> {
    let livekit = state
        .config
        .livekit_settings()
        .map_err(AppError::MissingConfig)?;

    let identity = participant_identity();
    let room = room_name(query.assistant(), query.purpose());
    let ttl = state.config.token_ttl();

    let token = AccessToken::with_api_key(livekit.api_key, livekit.api_secret)
        .with_identity(&identity)
        .with_name(&identity)
        .with_ttl(ttl)
        .with_grants(VideoGrants {
            room_join: true,
            room: room.clone(),
            can_publish: true,
            can_publish_data: true,
            can_subscribe: true,
            ..Default::default()
        })
        .to_jwt()
        .map_err(|e| AppError::TokenGeneration(e.to_string()))?;

    info!(
        assistant = query.assistant(),
        purpose = query.purpose(),
        room = %room,
        identity = %identity,
        "issued connection details"
    );

    let details = ConnectionDetails {
        server_address: livekit.url.to_string(),
        session_id: room,
        participant_id: identity,
        token,
        ttl_seconds: Some(ttl.as_secs()),
    };

    Ok(([(header::CACHE_CONTROL, "no-store")], Json(details)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults() {
        let query = ConnectionDetailsQuery::default();
        assert_eq!(query.assistant(), "default");
        assert_eq!(query.purpose(), "landing");

        let query = ConnectionDetailsQuery {
            assistant: Some(String::new()),
            purpose: Some("onboarding".to_string()),
        };
        assert_eq!(query.assistant(), "default");
        assert_eq!(query.purpose(), "onboarding");
    }

    #[test]
    fn test_room_name_format() {
        let room = room_name("alice", "onboarding");
        let suffix = room.strip_prefix("alice_onboarding_room_").unwrap();
        assert!(suffix.parse::<u32>().unwrap() < 10_000);
    }

    #[test]
    fn test_participant_identity_format() {
        let identity = participant_identity();
        let suffix = identity.strip_prefix("user_").unwrap();
        assert!(suffix.parse::<u32>().unwrap() < 10_000);
    }
}
