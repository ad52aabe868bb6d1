//! Configuration management for the Basewire companion.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/basewire/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("ws_path must start with '/', got {0}")]
    InvalidWsPath(String),

    #[error("probe_timeout_secs must be between 1 and 300 seconds, got {0}")]
    InvalidProbeTimeout(u64),

    #[error("handshake_timeout_secs must be between 1 and 300 seconds, got {0}")]
    InvalidHandshakeTimeout(u64),

    #[error("call_timeout_secs must be at most 3600 seconds, got {0}")]
    InvalidCallTimeout(u64),

    #[error("outbound_queue must be between 1 and 4096, got {0}")]
    InvalidOutboundQueue(usize),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the companion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General configuration.
    pub general: GeneralConfig,

    /// Channel connection settings.
    pub connection: ConnectionConfig,
}

/// General configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Private directory holding the static key pair and pinned keys.
    pub config_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Settings of the secure channel to an appliance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// HTTP path upgraded to the WebSocket.
    pub ws_path: String,

    /// Timeout of the unauthenticated liveness probe.
    pub probe_timeout_secs: u64,

    /// Timeout of the whole Noise handshake.
    pub handshake_timeout_secs: u64,

    /// Deadline applied to each call by the CLI (0 = none). On expiry the
    /// connection is closed.
    pub call_timeout_secs: u64,

    /// Admit one call at a time. When false, calls are correlated by id and
    /// may be in flight concurrently.
    pub serialize_calls: bool,

    /// Capacity of the outbound frame queue.
    pub outbound_queue: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ws_path: "/ws".to_string(),
            probe_timeout_secs: 5,
            handshake_timeout_secs: 10,
            call_timeout_secs: 60,
            serialize_calls: true,
            outbound_queue: 64,
        }
    }
}

impl ConnectionConfig {
    /// Probe timeout as a `Duration`.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Handshake timeout as a `Duration`.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Per-call deadline, if any.
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Returns the default private configuration directory.
fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("basewire")
}

impl Config {
    /// Path of the persisted static key pair.
    pub fn keypair_path(&self) -> PathBuf {
        self.general.config_dir.join("noise_static_keypair.json")
    }

    /// Path of the pairing store.
    pub fn pinned_keys_path(&self) -> PathBuf {
        self.general.config_dir.join("pinned_keys.json")
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - BASEWIRE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - BASEWIRE_CONFIG_DIR: Override the private configuration directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("BASEWIRE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.general.log_level = level;
            }
        }

        if let Ok(dir) = std::env::var("BASEWIRE_CONFIG_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding config_dir from environment: {}", dir);
                self.general.config_dir = PathBuf::from(dir);
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let conn = &self.connection;

        if !conn.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidWsPath(conn.ws_path.clone()));
        }

        if !(1..=300).contains(&conn.probe_timeout_secs) {
            return Err(ConfigError::InvalidProbeTimeout(conn.probe_timeout_secs));
        }

        if !(1..=300).contains(&conn.handshake_timeout_secs) {
            return Err(ConfigError::InvalidHandshakeTimeout(
                conn.handshake_timeout_secs,
            ));
        }

        if conn.call_timeout_secs > 3600 {
            return Err(ConfigError::InvalidCallTimeout(conn.call_timeout_secs));
        }

        if !(1..=4096).contains(&conn.outbound_queue) {
            return Err(ConfigError::InvalidOutboundQueue(conn.outbound_queue));
        }

        let level = self.general.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.general.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
