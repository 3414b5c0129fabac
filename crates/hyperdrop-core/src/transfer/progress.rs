//! Observable transfer state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::file::FileMetadata;

/// Name used when the peer never announced one.
pub const UNKNOWN_PEER_NAME: &str = "Unknown Device";

/// Status of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferStatus {
    /// Session attached, nothing moved yet
    #[default]
    Pending,
    /// A file is in flight
    Transferring,
    /// The whole set has been sent or received
    Complete,
    /// The channel failed
    Error,
}

impl TransferStatus {
    /// Lowercase name of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Transferring => "transferring",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of the file currently in flight.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransferProgress {
    /// Bytes sent or received for the current file
    pub bytes_transferred: u64,
    /// Size of the current file
    pub total_bytes: u64,
    /// Completion, 0 to 100
    pub percentage: f64,
    /// Smoothed throughput in bytes per second
    pub speed_bps: f64,
    /// Estimated time left, `None` while the speed is unknown
    pub time_remaining: Option<Duration>,
    /// Session status
    pub status: TransferStatus,
}

impl TransferProgress {
    /// Progress at the start of a file.
    pub fn starting(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            status: TransferStatus::Transferring,
            ..Self::default()
        }
    }

    /// Update counters after a chunk.
    pub fn advance(&mut self, bytes_transferred: u64, speed_bps: f64) {
        self.bytes_transferred = bytes_transferred;
        self.percentage = percentage(bytes_transferred, self.total_bytes);
        self.speed_bps = if speed_bps.is_finite() {
            speed_bps.max(0.0)
        } else {
            0.0
        };
        self.time_remaining =
            super::speed::eta(self.total_bytes, bytes_transferred, self.speed_bps);
    }

    /// Mark the current file done, showing its average speed.
    pub fn finish_file(&mut self, average_bps: f64) {
        self.percentage = 100.0;
        self.speed_bps = average_bps;
        self.time_remaining = None;
    }
}

fn percentage(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Which side of the session this controller plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends files
    Sender,
    /// Receives files
    Receiver,
}

/// One attached channel and what is known about its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Role for the lifetime of the session
    pub role: Role,
    /// Name the peer announced
    pub peer_display_name: Option<String>,
    /// Files in the set
    pub total_files: u32,
    /// Files finished so far
    pub files_completed: u32,
}

impl Session {
    /// A fresh session for `role`.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            peer_display_name: None,
            total_files: 0,
            files_completed: 0,
        }
    }
}

/// Everything a UI shows about the current session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransferSnapshot {
    /// Progress of the current file
    pub progress: TransferProgress,
    /// Name of the current file
    pub current_file_name: String,
    /// Files finished so far
    pub files_completed: u32,
    /// Files in the set
    pub total_files: u32,
    /// Peer's announced name
    pub peer_name: Option<String>,
    /// Whether a channel is attached and open
    pub connected: bool,
    /// Human-readable connection problem
    pub connection_error: Option<String>,
}

/// A file delivered by the receive side.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    /// Metadata announced by the sender
    pub metadata: FileMetadata,
    /// File contents in chunk order
    pub data: Vec<u8>,
    /// Sender's announced name
    pub sender_name: String,
    /// Average speed over the whole file
    pub transfer_speed_bps: f64,
    /// Time from metadata to completion
    pub transfer_time: Duration,
    /// Indexes that never arrived; empty for a complete file
    pub missing_chunks: Vec<u32>,
    /// When the file was completed
    pub received_at: DateTime<Utc>,
}

impl ReceivedFile {
    /// Returns true if every chunk arrived and the length matches the metadata.
    pub fn is_complete(&self) -> bool {
        self.missing_chunks.is_empty() && self.data.len() as u64 == self.metadata.size
    }
}

/// Receives the results of a session.
pub trait TransferObserver: Send {
    /// A file finished arriving.
    fn file_received(&mut self, file: ReceivedFile);

    /// Something went wrong that the user should hear about.
    fn error(&mut self, _message: &str) {}
}

impl TransferObserver for () {
    fn file_received(&mut self, _file: ReceivedFile) {}
}

impl TransferObserver for mpsc::UnboundedSender<ReceivedFile> {
    fn file_received(&mut self, file: ReceivedFile) {
        if self.send(file).is_err() {
            tracing::debug!("Received file dropped, observer channel closed");
        }
    }
}
