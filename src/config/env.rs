use std::str::FromStr;

use super::ServerConfig;

/// Read `key` and parse it, falling back to `default` when unset or empty.
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("Invalid value for {key} ({raw:?}): {e}").into()),
        None => Ok(default),
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.trim().is_empty())
}

/// Build a configuration from `lookup`, applying defaults for missing keys.
pub(super) fn load<F>(lookup: F) -> Result<ServerConfig, Box<dyn std::error::Error>>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = ServerConfig::default();

    let mut config = ServerConfig {
        host: non_empty(&lookup, "HOST").unwrap_or_else(|| defaults.host.clone()),
        port: parse_or(&lookup, "PORT", defaults.port)?,
        livekit_url: non_empty(&lookup, "LIVEKIT_URL"),
        livekit_api_key: non_empty(&lookup, "LIVEKIT_API_KEY"),
        livekit_api_secret: non_empty(&lookup, "LIVEKIT_API_SECRET"),
        token_ttl_seconds: parse_or(&lookup, "TOKEN_TTL_SECONDS", defaults.token_ttl_seconds)?,
        cors_allowed_origins: non_empty(&lookup, "CORS_ALLOWED_ORIGINS"),
        connection_details_url: non_empty(&lookup, "CONNECTION_DETAILS_URL")
            .unwrap_or_else(|| defaults.connection_details_url.clone()),
        no_agent_timeout_ms: parse_or(&lookup, "NO_AGENT_TIMEOUT_MS", defaults.no_agent_timeout_ms)?,
        feedback_recency_window_ms: parse_or(
            &lookup,
            "FEEDBACK_RECENCY_WINDOW_MS",
            defaults.feedback_recency_window_ms,
        )?,
        feedback_delay_ms: parse_or(&lookup, "FEEDBACK_DELAY_MS", defaults.feedback_delay_ms)?,
    };

    // Name used by a web frontend sharing the same .env file.
    if config.livekit_url.is_none() {
        config.livekit_url = non_empty(&lookup, "NEXT_PUBLIC_LIVEKIT_URL");
    }

    Ok(config)
}
