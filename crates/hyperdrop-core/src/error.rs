//! Error types for HyperDrop.
//!
//! This module provides a unified error type for all engine operations.
//! Errors split into two propagation classes: decode-level faults that the
//! controller logs and swallows, and channel-level faults that end the
//! session.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for HyperDrop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for HyperDrop.
#[derive(Error, Debug)]
pub enum Error {
    /// A binary or control frame could not be decoded
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The transport reported an error or closed unexpectedly
    #[error("channel fault: {0}")]
    ChannelFault(String),

    /// A file exceeds the size ceiling of the channel
    #[error("file '{name}' is {size} bytes, limit is {limit} bytes")]
    CapacityExceeded {
        /// File name
        name: String,
        /// File size in bytes
        size: u64,
        /// Configured ceiling in bytes
        limit: u64,
    },

    /// The channel did not open in time
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// A file completed with chunks missing
    #[error("file '{name}' completed with {missing} missing chunks")]
    IncompleteTransfer {
        /// File name
        name: String,
        /// Number of empty chunk slots
        missing: usize,
    },

    /// A file's reassembled length differs from its announced size
    #[error("file '{name}' announced {expected} bytes, received {actual}")]
    SizeMismatch {
        /// File name
        name: String,
        /// Size from the file's metadata
        expected: u64,
        /// Bytes actually reassembled
        actual: u64,
    },

    /// No channel is attached
    #[error("not connected")]
    NotConnected,

    /// Operation not allowed in the current session state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns whether this error ends the current session.
    ///
    /// Decode faults and per-file problems leave the session running; only
    /// transport-level failures are fatal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ChannelFault(_) | Self::Timeout(_) | Self::NotConnected | Self::Io(_)
        )
    }

    /// Returns a short, human-readable message suitable for a UI.
    ///
    /// Raw transport errors never cross the engine boundary; they are folded
    /// into a generic connection message here.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ChannelFault(_) => "Connection error - the peer may have disconnected".to_string(),
            Self::Timeout(_) => {
                "Connection timeout - the other device may be offline".to_string()
            }
            Self::NotConnected => "Not connected".to_string(),
            Self::CapacityExceeded { name, limit, .. } => format!(
                "'{name}' is too large for this connection (limit {})",
                crate::file::format_size(*limit)
            ),
            Self::IncompleteTransfer { name, missing } => {
                format!("'{name}' arrived incomplete ({missing} chunks missing)")
            }
            Self::SizeMismatch {
                name,
                expected,
                actual,
            } => format!("'{name}' arrived incomplete ({actual} of {expected} bytes)"),
            Self::Io(_) => "Failed to read file".to_string(),
            other => other.to_string(),
        }
    }
}
