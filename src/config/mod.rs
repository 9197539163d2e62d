//! Configuration module for the Voice Agent Studio server
//!
//! This module handles configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `env`: Environment variable loading
//! - `yaml`: YAML configuration file loading
//!
//! # Example
//! ```rust,no_run
//! use voice_agent_studio::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod yaml;

pub use yaml::YamlConfig;

/// LiveKit server settings needed to mint access tokens.
#[derive(Debug, Clone, Copy)]
pub struct LiveKitSettings<'a> {
    pub url: &'a str,
    pub api_key: &'a str,
    pub api_secret: &'a str,
}

/// Server configuration
///
/// Contains everything the credential server and the session clients need:
/// - Server settings (host, port, CORS)
/// - LiveKit settings used to mint access tokens
/// - Client-side session settings (credential endpoint, no-agent timeout)
/// - Feedback round settings (recency window, simulated delay)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // LiveKit settings
    pub livekit_url: Option<String>,
    pub livekit_api_key: Option<String>,
    pub livekit_api_secret: Option<String>,
    /// Lifetime of minted access tokens. Default: 900
    pub token_ttl_seconds: u64,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Session client settings
    /// Endpoint sessions fetch their credentials from
    pub connection_details_url: String,
    /// Default: 10000
    pub no_agent_timeout_ms: u64,

    // Feedback round settings
    /// Default: 5000
    pub feedback_recency_window_ms: u64,
    /// Default: 5000
    pub feedback_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            livekit_url: None,
            livekit_api_key: None,
            livekit_api_secret: None,
            token_ttl_seconds: 15 * 60,
            cors_allowed_origins: None,
            connection_details_url: "http://localhost:3001/connection-details".to_string(),
            no_agent_timeout_ms: 10_000,
            feedback_recency_window_ms: 5_000,
            feedback_delay_ms: 5_000,
        }
    }
}

/// Zeroize secret fields when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.livekit_api_key {
            key.zeroize();
        }
        if let Some(ref mut secret) = self.livekit_api_secret {
            secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (with defaults)
    ///
    /// The .env file is loaded in main.rs at startup, so its values are
    /// visible here as regular environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Same rules as [`from_env`](Self::from_env). Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        env::load(lookup)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        Self::from_file_with_lookup(path, |key| std::env::var(key).ok())
    }

    /// [`from_file`](Self::from_file) with an explicit environment lookup.
    pub fn from_file_with_lookup<F>(
        path: &PathBuf,
        lookup: F,
    ) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = env::load(lookup)?;
        yaml_config.apply_to(&mut config);
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// LiveKit settings, or the name of the first missing one.
    pub fn livekit_settings(&self) -> Result<LiveKitSettings<'_>, &'static str> {
        let url = self.livekit_url.as_deref().ok_or("LIVEKIT_URL")?;
        let api_key = self.livekit_api_key.as_deref().ok_or("LIVEKIT_API_KEY")?;
        let api_secret = self
            .livekit_api_secret
            .as_deref()
            .ok_or("LIVEKIT_API_SECRET")?;
        Ok(LiveKitSettings {
            url,
            api_key,
            api_secret,
        })
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    pub fn no_agent_timeout(&self) -> Duration {
        Duration::from_millis(self.no_agent_timeout_ms)
    }

    pub fn feedback_recency_window(&self) -> Duration {
        Duration::from_millis(self.feedback_recency_window_ms)
    }

    pub fn feedback_delay(&self) -> Duration {
        Duration::from_millis(self.feedback_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ServerConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.address(), "0.0.0.0:3001");
        assert_eq!(config.token_ttl(), Duration::from_secs(900));
        assert_eq!(config.no_agent_timeout(), Duration::from_secs(10));
        assert_eq!(config.feedback_recency_window(), Duration::from_secs(5));
        assert_eq!(config.feedback_delay(), Duration::from_secs(5));
        assert!(config.livekit_url.is_none());
        assert!(config.cors_allowed_origins.is_none());
    }

    #[test]
    fn test_env_values() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("LIVEKIT_URL", "wss://example.livekit.cloud"),
            ("LIVEKIT_API_KEY", "key"),
            ("LIVEKIT_API_SECRET", "secret"),
            ("TOKEN_TTL_SECONDS", "60"),
            ("NO_AGENT_TIMEOUT_MS", "2500"),
            ("FEEDBACK_RECENCY_WINDOW_MS", "3000"),
            ("FEEDBACK_DELAY_MS", "10"),
        ]))
        .unwrap();

        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(config.token_ttl_seconds, 60);
        assert_eq!(config.no_agent_timeout(), Duration::from_millis(2500));
        assert_eq!(config.feedback_recency_window(), Duration::from_secs(3));
        assert_eq!(config.feedback_delay(), Duration::from_millis(10));

        let livekit = config.livekit_settings().unwrap();
        assert_eq!(livekit.url, "wss://example.livekit.cloud");
        assert_eq!(livekit.api_key, "key");
        assert_eq!(livekit.api_secret, "secret");
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let result = ServerConfig::from_lookup(lookup_from(&[("PORT", "not-a-port")]));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("PORT"));
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("LIVEKIT_API_KEY", "  "),
            ("PORT", ""),
        ]))
        .unwrap();
        assert!(config.livekit_api_key.is_none());
        assert_eq!(config.port, 3001);
    }

    #[test]
    fn test_public_livekit_url_fallback() {
        let config = ServerConfig::from_lookup(lookup_from(&[(
            "NEXT_PUBLIC_LIVEKIT_URL",
            "wss://public.livekit.cloud",
        )]))
        .unwrap();
        assert_eq!(
            config.livekit_url.as_deref(),
            Some("wss://public.livekit.cloud")
        );
    }

    #[test]
    fn test_livekit_settings_reports_first_missing_key() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("LIVEKIT_URL", "wss://example.livekit.cloud"),
            ("LIVEKIT_API_KEY", "key"),
        ]))
        .unwrap();
        assert_eq!(config.livekit_settings().unwrap_err(), "LIVEKIT_API_SECRET");

        let config = ServerConfig::default();
        assert_eq!(config.livekit_settings().unwrap_err(), "LIVEKIT_URL");
    }

    #[test]
    fn test_from_file_yaml_overrides_env() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  port: 9000

livekit:
  api_key: "yaml-key"

feedback:
  delay_ms: 100
"#;
        fs::write(&config_path, yaml_content).unwrap();

        let config = ServerConfig::from_file_with_lookup(
            &config_path,
            lookup_from(&[
                ("HOST", "10.0.0.1"),
                ("PORT", "8080"),
                ("LIVEKIT_API_KEY", "env-key"),
                ("LIVEKIT_API_SECRET", "env-secret"),
            ]),
        )
        .unwrap();

        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.livekit_api_key.as_deref(), Some("yaml-key"));
        assert_eq!(config.livekit_api_secret.as_deref(), Some("env-secret"));
        assert_eq!(config.feedback_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_from_file_missing_file() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = ServerConfig::from_file_with_lookup(&path, lookup_from(&[]));
        assert!(result.is_err());
    }
}
