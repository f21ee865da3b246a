//! Configuration management for pairlink.
//!
//! This module provides TOML-based configuration with support for multiple
//! configuration sources (default, file-based, environment variables) and
//! validation of configuration parameters.

use crate::crypto::CipherScheme;
use crate::utils::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "pairlink.toml";

/// Environment variable prefix for configuration
pub const ENV_PREFIX: &str = "PAIRLINK";

/// Complete configuration for the pairing subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairlinkConfig {
    /// Relay server and client configuration
    pub relay: RelayConfig,
    /// Cryptographic configuration
    pub crypto: CryptoConfig,
    /// Session persistence configuration
    pub session: SessionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Relay server and transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay server URL (host:port) the client connects to.
    /// Always explicit; there is no hardcoded default server.
    pub server_url: String,
    /// Address the relay server binary listens on
    pub listen_addr: String,
    /// Token-bucket capacity for control operations (create/join) per second
    pub control_rate_limit: u32,
    /// Token-bucket capacity for message relay per second
    pub message_rate_limit: u32,
    /// Seconds of inactivity before per-client bookkeeping (rate-limit
    /// buckets, dead room entries) is reclaimed
    pub room_idle_expiry: u64,
}

/// Cryptographic configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Sealing shape for application payloads: derive-once symmetric
    /// ("shared_secret") or per-message asymmetric sealing ("ecies")
    pub scheme: CipherScheme,
}

/// Session and channel lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Milliseconds to wait for the peer before transitioning to Timeout
    pub waiting_timeout_ms: u64,
    /// Lifetime of a persisted session in milliseconds
    pub session_duration_ms: u64,
    /// Maximum number of payloads queued before the channel is linked.
    /// On overflow the oldest queued payload is dropped.
    pub max_queued_messages: usize,
    /// Path of the session record file
    pub store_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for PairlinkConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            crypto: CryptoConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_url: format!("127.0.0.1:{}", crate::defaults::DEFAULT_RELAY_PORT),
            listen_addr: format!("0.0.0.0:{}", crate::defaults::DEFAULT_RELAY_PORT),
            control_rate_limit: crate::defaults::DEFAULT_CONTROL_RATE_LIMIT,
            message_rate_limit: crate::defaults::DEFAULT_MESSAGE_RATE_LIMIT,
            room_idle_expiry: 3600,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            scheme: CipherScheme::SharedSecret,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let store_path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pairlink")
            .join("session.json");

        Self {
            waiting_timeout_ms: crate::defaults::DEFAULT_WAITING_TIMEOUT_MS,
            session_duration_ms: crate::defaults::DEFAULT_SESSION_DURATION_MS,
            max_queued_messages: crate::defaults::DEFAULT_MAX_QUEUED_MESSAGES,
            store_path,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PairlinkConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with multiple sources (default, file, environment)
    ///
    /// # Arguments
    ///
    /// * `config_file` - Optional path to configuration file
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_file {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        } else {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                config = Self::from_file(&default_path)?;
            }
        }

        config = config.merge_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize {
            reason: e.to_string(),
        })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Merge configuration from environment variables
    fn merge_from_env(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var("PAIRLINK_RELAY_SERVER_URL") {
            self.relay.server_url = url;
        }

        if let Ok(addr) = std::env::var("PAIRLINK_RELAY_LISTEN_ADDR") {
            self.relay.listen_addr = addr;
        }

        if let Ok(level) = std::env::var("PAIRLINK_LOGGING_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(timeout) = std::env::var("PAIRLINK_SESSION_WAITING_TIMEOUT_MS") {
            self.session.waiting_timeout_ms =
                timeout.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "PAIRLINK_SESSION_WAITING_TIMEOUT_MS".to_string(),
                    value: timeout,
                })?;
        }

        Ok(self)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.relay.server_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "relay.server_url".to_string(),
                value: String::new(),
            }
            .into());
        }

        if self.relay.control_rate_limit == 0 || self.relay.message_rate_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "relay rate limits".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        if self.session.waiting_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.waiting_timeout_ms".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        if self.session.max_queued_messages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.max_queued_messages".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "logging.level".to_string(),
                    value: self.logging.level.clone(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Get the configuration as a pretty-printed TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::Serialize {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = PairlinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.session.waiting_timeout_ms,
            crate::defaults::DEFAULT_WAITING_TIMEOUT_MS
        );
        assert_eq!(config.crypto.scheme, CipherScheme::SharedSecret);
    }

    #[test]
    fn test_config_serialization() {
        let config = PairlinkConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("server_url"));
        assert!(toml_str.contains("waiting_timeout_ms"));
    }

    #[test]
    fn test_config_file_operations() {
        let config = PairlinkConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        config.save(temp_file.path()).unwrap();
        let loaded = PairlinkConfig::from_file(temp_file.path()).unwrap();

        assert_eq!(config.relay.server_url, loaded.relay.server_url);
        assert_eq!(
            config.session.max_queued_messages,
            loaded.session.max_queued_messages
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = PairlinkConfig::default();
        assert!(config.validate().is_ok());

        config.session.waiting_timeout_ms = 0;
        assert!(config.validate().is_err());

        config = PairlinkConfig::default();
        config.relay.control_rate_limit = 0;
        assert!(config.validate().is_err());

        config = PairlinkConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("PAIRLINK_SESSION_WAITING_TIMEOUT_MS", "9999");

        let config = PairlinkConfig::default().merge_from_env().unwrap();
        assert_eq!(config.session.waiting_timeout_ms, 9999);

        std::env::remove_var("PAIRLINK_SESSION_WAITING_TIMEOUT_MS");
    }
}
