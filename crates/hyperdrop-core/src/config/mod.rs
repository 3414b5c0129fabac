//! Configuration management for HyperDrop.
//!
//! This module handles loading, saving, and validating HyperDrop configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/hyperdrop/config.toml` |
//! | macOS | `~/Library/Application Support/HyperDrop/config.toml` |
//! | Windows | `%APPDATA%\HyperDrop\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use hyperdrop_core::config::Config;
//!
//! let config = Config::load()?;
//! config.validate()?;
//! let engine = config.transfer_config();
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::tcp::MAX_FRAME_SIZE;
use crate::error::{Error, Result};
use crate::protocol::CHUNK_HEADER_SIZE;
use crate::transfer::TransferConfig;

/// Main configuration struct for HyperDrop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Transfer settings
    pub transfer: TransferSettings,
    /// Network settings
    pub network: NetworkConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Name announced to the peer
    pub device_name: String,
    /// Default output directory for received files
    pub default_output: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: hostname::get().map_or_else(
                |_| "HyperDrop Device".to_string(),
                |h| h.to_string_lossy().to_string(),
            ),
            default_output: None,
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Pending-bytes level that pauses the sender
    pub backpressure_threshold: usize,
    /// How often the sender re-checks the pending-bytes gauge
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Pause between consecutive files
    #[serde(with = "humantime_serde")]
    pub inter_file_delay: Duration,
    /// Files larger than this are streamed from disk
    pub buffer_limit: u64,
    /// Largest file sent or accepted (None for unlimited)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    /// Most chunks an incoming file may announce
    pub max_chunks: u32,
    /// Discard files that arrive with missing chunks
    pub strict_completion: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            backpressure_threshold: crate::DEFAULT_BACKPRESSURE_THRESHOLD,
            poll_interval: Duration::from_millis(crate::DEFAULT_POLL_INTERVAL_MS),
            inter_file_delay: Duration::from_millis(crate::DEFAULT_INTER_FILE_DELAY_MS),
            buffer_limit: crate::DEFAULT_BUFFER_LIMIT,
            max_file_size: None,
            max_chunks: crate::DEFAULT_MAX_CHUNKS,
            strict_completion: false,
        }
    }
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Time allowed for the channel to open
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Address `receive` listens on
    pub listen_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS),
            listen_addr: crate::DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::ConfigError(format!("Failed to create config directory: {e}")))?;
        }

        std::fs::write(&path, self.to_toml()?)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Serialize configuration as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "hyperdrop", "HyperDrop")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Check values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let transfer = &self.transfer;

        if transfer.chunk_size == 0 {
            return Err(invalid("transfer.chunk_size", "must be greater than zero"));
        }
        if transfer.chunk_size + CHUNK_HEADER_SIZE > MAX_FRAME_SIZE {
            return Err(invalid(
                "transfer.chunk_size",
                &format!(
                    "must be at most {} bytes",
                    MAX_FRAME_SIZE - CHUNK_HEADER_SIZE
                ),
            ));
        }
        if transfer.poll_interval.is_zero() {
            return Err(invalid("transfer.poll_interval", "must be greater than zero"));
        }
        if transfer.max_file_size == Some(0) {
            return Err(invalid("transfer.max_file_size", "must be greater than zero"));
        }
        if transfer.max_chunks == 0 {
            return Err(invalid("transfer.max_chunks", "must be greater than zero"));
        }
        if self.network.connect_timeout.is_zero() {
            return Err(invalid("network.connect_timeout", "must be greater than zero"));
        }

        Ok(())
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            chunk_size: self.transfer.chunk_size,
            backpressure_threshold: self.transfer.backpressure_threshold,
            poll_interval: self.transfer.poll_interval,
            inter_file_delay: self.transfer.inter_file_delay,
            buffer_limit: self.transfer.buffer_limit,
            max_file_size: self.transfer.max_file_size,
            max_chunks: self.transfer.max_chunks,
            strict_completion: self.transfer.strict_completion,
            connect_timeout: self.network.connect_timeout,
        }
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        s.strip_suffix("ms")
            .map(|ms| {
                ms.parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}
