//! Configuration management for Notestream
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{NotestreamError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Main configuration structure for Notestream
///
/// Every section has defaults, so an empty file (or no file at all) yields
/// a client talking to a backend on `127.0.0.1:8001`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Question-answering backend
    #[serde(default)]
    pub backend: BackendConfig,
    /// Stream session behavior
    #[serde(default)]
    pub session: SessionConfig,
    /// Account plan and quota
    #[serde(default)]
    pub account: AccountConfig,
    /// Realtime room settings
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Conversation storage
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Question-answering backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Streaming endpoint the question is POSTed to
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Identity sent as `user_id` and billed for token usage
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Bound on establishing the connection, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Extra headers sent with every request, e.g. `Authorization`
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8001/api/stream".to_string()
}

fn default_identity() -> String {
    "anonymous".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            identity: default_identity(),
            request_timeout_seconds: default_request_timeout(),
            headers: HashMap::new(),
        }
    }
}

/// Stream session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Longest allowed gap between two response chunks, in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

fn default_idle_timeout() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

/// Account plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Usage is recorded and checked against the token quota
    #[default]
    Free,
    /// Usage is neither recorded nor limited
    Pro,
}

impl FromStr for Plan {
    type Err = NotestreamError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "pro" => Ok(Plan::Pro),
            other => Err(NotestreamError::Config(format!(
                "Invalid plan: {}. Must be one of: free, pro",
                other
            ))),
        }
    }
}

/// Account configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account plan
    #[serde(default)]
    pub plan: Plan,

    /// Token budget per identity (None = unlimited)
    #[serde(default)]
    pub max_total_tokens: Option<u64>,
}

/// Realtime room configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Room joined for presence and peer messages
    #[serde(default = "default_room")]
    pub room: String,

    /// Seconds to wait for the subscription acknowledgement
    #[serde(default = "default_subscribe_timeout")]
    pub subscribe_timeout_seconds: u64,
}

fn default_room() -> String {
    "room_one".to_string()
}

fn default_subscribe_timeout() -> u64 {
    10
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            room: default_room(),
            subscribe_timeout_seconds: default_subscribe_timeout(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file; defaults to the user data directory
    #[serde(default)]
    pub path: Option<String>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| NotestreamError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|e| NotestreamError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(endpoint) = std::env::var("NOTESTREAM_ENDPOINT") {
            tracing::debug!(endpoint = %endpoint, "Env override: NOTESTREAM_ENDPOINT");
            self.backend.endpoint = endpoint;
        }

        if let Ok(identity) = std::env::var("NOTESTREAM_IDENTITY") {
            self.backend.identity = identity;
        }

        if let Ok(timeout) = std::env::var("NOTESTREAM_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.backend.request_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid NOTESTREAM_REQUEST_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(timeout) = std::env::var("NOTESTREAM_IDLE_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.session.idle_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid NOTESTREAM_IDLE_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(plan) = std::env::var("NOTESTREAM_PLAN") {
            match plan.parse() {
                Ok(value) => self.account.plan = value,
                Err(e) => tracing::warn!("Invalid NOTESTREAM_PLAN: {}", e),
            }
        }

        if let Ok(max) = std::env::var("NOTESTREAM_MAX_TOTAL_TOKENS") {
            if let Ok(value) = max.parse() {
                self.account.max_total_tokens = Some(value);
            } else {
                tracing::warn!("Invalid NOTESTREAM_MAX_TOTAL_TOKENS: {}", max);
            }
        }

        if let Ok(room) = std::env::var("NOTESTREAM_ROOM") {
            self.realtime.room = room;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(endpoint) = &cli.endpoint {
            self.backend.endpoint = endpoint.clone();
        }
        if let Some(identity) = &cli.identity {
            self.backend.identity = identity.clone();
        }
        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(path.clone());
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// The backend endpoint as a URL
    ///
    /// # Errors
    ///
    /// Returns `NotestreamError::Config` if the endpoint is not an absolute
    /// http(s) URL.
    pub fn endpoint_url(&self) -> Result<url::Url> {
        let url = url::Url::parse(&self.backend.endpoint).map_err(|e| {
            NotestreamError::Config(format!(
                "Invalid backend endpoint {}: {}",
                self.backend.endpoint, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NotestreamError::Config(format!(
                "Backend endpoint must use http or https, got {}",
                url.scheme()
            ))
            .into());
        }
        Ok(url)
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are within acceptable ranges
    /// and that required fields are properly set.
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        self.endpoint_url()?;

        if self.backend.identity.trim().is_empty() {
            return Err(NotestreamError::Config("identity cannot be empty".to_string()).into());
        }

        if self.backend.request_timeout_seconds == 0 {
            return Err(NotestreamError::Config(
                "request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.idle_timeout_seconds == 0 {
            return Err(NotestreamError::Config(
                "idle_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.account.max_total_tokens == Some(0) {
            return Err(NotestreamError::Config(
                "max_total_tokens must be greater than 0 when set".to_string(),
            )
            .into());
        }

        if self.realtime.room.trim().is_empty() {
            return Err(NotestreamError::Config("room cannot be empty".to_string()).into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend.endpoint, "http://127.0.0.1:8001/api/stream");
        assert_eq!(config.session.idle_timeout_seconds, 60);
        assert_eq!(config.account.plan, Plan::Free);
        assert_eq!(config.realtime.room, "room_one");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = Config::from_yaml(
            "backend:\n  identity: ada\naccount:\n  plan: pro\n  max_total_tokens: 5000\n",
        )
        .unwrap();
        assert_eq!(config.backend.identity, "ada");
        assert_eq!(config.backend.endpoint, default_endpoint());
        assert_eq!(config.account.plan, Plan::Pro);
        assert_eq!(config.account.max_total_tokens, Some(5000));
        assert_eq!(config.session.idle_timeout_seconds, 60);
    }

    #[test]
    fn test_backend_headers_from_yaml() {
        let config = Config::from_yaml(
            "backend:\n  headers:\n    Authorization: Bearer abc\n    X-Client: notestream\n",
        )
        .unwrap();
        assert_eq!(config.backend.headers.len(), 2);
        assert_eq!(
            config.backend.headers.get("Authorization").map(String::as_str),
            Some("Bearer abc")
        );
        assert!(Config::default().backend.headers.is_empty());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Config::from_yaml("  \n").unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = Config::from_yaml("backend: [").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NotestreamError>(),
            Some(NotestreamError::Config(_))
        ));
    }

    #[test]
    fn test_validation_rejects_bad_endpoint() {
        let mut config = Config::default();
        config.backend.endpoint = "not a url".to_string();
        assert!(config.validate().is_err());

        config.backend.endpoint = "ftp://example.com/stream".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeouts() {
        let mut config = Config::default();
        config.session.idle_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend.request_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_quota() {
        let mut config = Config::default();
        config.account.max_total_tokens = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_plan_from_str() {
        assert_eq!("PRO".parse::<Plan>().unwrap(), Plan::Pro);
        assert!("gold".parse::<Plan>().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("NOTESTREAM_ENDPOINT", "http://localhost:9000/api/stream");
        std::env::set_var("NOTESTREAM_IDLE_TIMEOUT_SECONDS", "7");
        std::env::set_var("NOTESTREAM_PLAN", "pro");
        std::env::set_var("NOTESTREAM_MAX_TOTAL_TOKENS", "not-a-number");

        let mut config = Config::default();
        config.apply_env_vars();

        std::env::remove_var("NOTESTREAM_ENDPOINT");
        std::env::remove_var("NOTESTREAM_IDLE_TIMEOUT_SECONDS");
        std::env::remove_var("NOTESTREAM_PLAN");
        std::env::remove_var("NOTESTREAM_MAX_TOTAL_TOKENS");

        assert_eq!(config.backend.endpoint, "http://localhost:9000/api/stream");
        assert_eq!(config.session.idle_timeout_seconds, 7);
        assert_eq!(config.account.plan, Plan::Pro);
        assert_eq!(config.account.max_total_tokens, None);
    }

    #[test]
    #[serial]
    fn test_cli_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "backend:\n  identity: from-file\n").unwrap();

        let mut cli = Cli::default();
        cli.identity = Some("from-cli".to_string());
        cli.storage_path = Some("/tmp/notestream.db".to_string());

        let config = Config::load(path.to_str().unwrap(), &cli).unwrap();
        assert_eq!(config.backend.identity, "from-cli");
        assert_eq!(config.storage.path.as_deref(), Some("/tmp/notestream.db"));
    }
}
