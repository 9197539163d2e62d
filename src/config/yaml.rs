use serde::Deserialize;
use std::path::PathBuf;

use super::ServerConfig;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override whatever the environment provided.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// livekit:
///   url: "wss://studio.livekit.cloud"
///   api_key: "your-api-key"
///   api_secret: "your-api-secret"
///   token_ttl_seconds: 900
///
/// security:
///   cors_allowed_origins: "https://studio.example.com"
///
/// session:
///   connection_details_url: "http://localhost:3001/connection-details"
///   no_agent_timeout_ms: 10000
///
/// feedback:
///   recency_window_ms: 5000
///   delay_ms: 5000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub livekit: Option<LiveKitYaml>,
    pub security: Option<SecurityYaml>,
    pub session: Option<SessionYaml>,
    pub feedback: Option<FeedbackYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// LiveKit configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LiveKitYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Lifetime of minted access tokens
    pub token_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// Comma-separated list of origins or "*"
    pub cors_allowed_origins: Option<String>,
}

/// Client-side session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub connection_details_url: Option<String>,
    pub no_agent_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FeedbackYaml {
    pub recency_window_ms: Option<u64>,
    pub delay_ms: Option<u64>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }

    /// Override `config` with every value present in this file.
    pub(crate) fn apply_to(self, config: &mut ServerConfig) {
        if let Some(server) = self.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
        }

        if let Some(livekit) = self.livekit {
            if livekit.url.is_some() {
                config.livekit_url = livekit.url;
            }
            if livekit.api_key.is_some() {
                config.livekit_api_key = livekit.api_key;
            }
            if livekit.api_secret.is_some() {
                config.livekit_api_secret = livekit.api_secret;
            }
            if let Some(ttl) = livekit.token_ttl_seconds {
                config.token_ttl_seconds = ttl;
            }
        }

        if let Some(security) = self.security {
            if security.cors_allowed_origins.is_some() {
                config.cors_allowed_origins = security.cors_allowed_origins;
            }
        }

        if let Some(session) = self.session {
            if let Some(url) = session.connection_details_url {
                config.connection_details_url = url;
            }
            if let Some(ms) = session.no_agent_timeout_ms {
                config.no_agent_timeout_ms = ms;
            }
        }

        if let Some(feedback) = self.feedback {
            if let Some(ms) = feedback.recency_window_ms {
                config.feedback_recency_window_ms = ms;
            }
            if let Some(ms) = feedback.delay_ms {
                config.feedback_delay_ms = ms;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080

livekit:
  url: "ws://livekit.example.com"
  api_key: "test-key"
  api_secret: "test-secret"
  token_ttl_seconds: 600

security:
  cors_allowed_origins: "*"

session:
  connection_details_url: "http://localhost:8080/connection-details"
  no_agent_timeout_ms: 12000

feedback:
  recency_window_ms: 4000
  delay_ms: 250
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("127.0.0.1".to_string())
        );
        assert_eq!(config.server.as_ref().unwrap().port, Some(8080));
        let livekit = config.livekit.as_ref().unwrap();
        assert_eq!(livekit.url, Some("ws://livekit.example.com".to_string()));
        assert_eq!(livekit.token_ttl_seconds, Some(600));
        assert_eq!(
            config.security.as_ref().unwrap().cors_allowed_origins,
            Some("*".to_string())
        );
        assert_eq!(config.session.as_ref().unwrap().no_agent_timeout_ms, Some(12000));
        assert_eq!(config.feedback.as_ref().unwrap().delay_ms, Some(250));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
livekit:
  url: "ws://localhost:7880"
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.server.is_none());
        assert!(config.session.is_none());
        let livekit = config.livekit.unwrap();
        assert!(livekit.api_key.is_none());
        assert!(livekit.token_ttl_seconds.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("").unwrap_or_default();
        assert!(config.server.is_none());
        assert!(config.livekit.is_none());
        assert!(config.feedback.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(&config_path, "server:\n  host: \"localhost\"\n  port: 3000\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();

        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("localhost".to_string())
        );
        assert_eq!(config.server.as_ref().unwrap().port, Some(3000));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
