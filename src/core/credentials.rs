//! Connection credentials for real-time sessions.
//!
//! A [`ConnectionCredential`] is what the credential endpoint hands out for a
//! single connect attempt: where to connect, which session (room) to join, who
//! we are in it, and an opaque access token. Credentials are never cached and
//! never reused; every connect attempt asks for a fresh one.
//!
//! The wire format is `{serverAddress, sessionId, participantId, token,
//! ttlSeconds}`. The older `{serverUrl, roomName, participantName,
//! participantToken}` field names are accepted too.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Lifetime assumed when the endpoint does not report one.
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(15 * 60);

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const USER_AGENT: &str = concat!("voice-agent-studio/", env!("CARGO_PKG_VERSION"));

/// Errors raised while fetching a credential.
#[derive(Debug, Error)]
pub enum CredentialFetchError {
    /// The request never produced a response
    #[error("Network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-2xx status
    #[error("Credential endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The endpoint answered 2xx but the body was not a credential
    #[error("Malformed credential response: {0}")]
    MalformedBody(String),

    /// The endpoint URL could not be built
    #[error("Invalid credential endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Who is asking for a credential and for what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    /// Display name of the assistant to talk to, e.g. "ALICE"
    pub display_name: String,
    /// Purpose tag, e.g. "landing", "onboarding", "generated_assistant"
    pub purpose: String,
}

impl CredentialRequest {
    pub fn new(display_name: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            purpose: purpose.into(),
        }
    }
}

/// Short-lived access credential for one session attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionCredential {
    pub server_address: String,
    pub session_id: String,
    pub participant_id: String,
    token: String,
    pub issued_at: SystemTime,
    pub ttl: Duration,
}

impl ConnectionCredential {
    pub fn new(
        server_address: impl Into<String>,
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
        token: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            session_id: session_id.into(),
            participant_id: participant_id.into(),
            token: token.into(),
            issued_at: SystemTime::now(),
            ttl,
        }
    }

    /// The opaque access token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the credential's lifetime has run out.
    pub fn is_expired(&self) -> bool {
        self.issued_at
            .elapsed()
            .map(|age| age >= self.ttl)
            .unwrap_or(false)
    }
}

// The token grants room access; keep it out of logs.
impl fmt::Debug for ConnectionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCredential")
            .field("server_address", &self.server_address)
            .field("session_id", &self.session_id)
            .field("participant_id", &self.participant_id)
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// JSON body exchanged with the credential endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    #[serde(alias = "serverUrl")]
    pub server_address: String,
    #[serde(alias = "roomName")]
    pub session_id: String,
    #[serde(alias = "participantName")]
    pub participant_id: String,
    #[serde(alias = "participantToken")]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl From<ConnectionDetails> for ConnectionCredential {
    fn from(details: ConnectionDetails) -> Self {
        let ttl = details
            .ttl_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CREDENTIAL_TTL);
        ConnectionCredential::new(
            details.server_address,
            details.session_id,
            details.participant_id,
            details.token,
            ttl,
        )
    }
}

/// Source of connection credentials.
///
/// One call is one network request. Implementations never retry on their own;
/// the caller decides whether to try again.
#[async_trait]
pub trait ConnectionDetailsProvider: Send + Sync {
    async fn fetch(
        &self,
        request: &CredentialRequest,
    ) -> Result<ConnectionCredential, CredentialFetchError>;
}

/// Fetches credentials from `GET <endpoint>?assistant=<name>&type=<purpose>`.
#[derive(Debug, Clone)]
pub struct HttpConnectionDetailsProvider {
    http_client: Client,
    endpoint: Url,
}

impl HttpConnectionDetailsProvider {
    pub fn new(endpoint: &str) -> Result<Self, CredentialFetchError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| CredentialFetchError::InvalidEndpoint(e.to_string()))?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                CredentialFetchError::InvalidEndpoint(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_url(&self, request: &CredentialRequest) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("assistant", &request.display_name.to_lowercase())
            .append_pair("type", &request.purpose);
        url
    }
}

#[async_trait]
impl ConnectionDetailsProvider for HttpConnectionDetailsProvider {
    async fn fetch(
        &self,
        request: &CredentialRequest,
    ) -> Result<ConnectionCredential, CredentialFetchError> {
        let url = self.request_url(request);
        debug!(%url, "requesting connection details");

        let response = self
            .http_client
            .get(url)
            .header(http::header::CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|e| CredentialFetchError::Network(format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CredentialFetchError::Network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(CredentialFetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let details: ConnectionDetails = serde_json::from_str(&body)
            .map_err(|e| CredentialFetchError::MalformedBody(e.to_string()))?;

        Ok(details.into())
    }
}
