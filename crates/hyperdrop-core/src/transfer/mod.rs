//! File transfer engine for HyperDrop.
//!
//! This module moves files across an open [`Channel`](crate::channel::Channel):
//!
//! - Slicing files into indexed chunks and pacing them under backpressure
//! - Reassembling chunks by index on the receiving side
//! - Progress tracking with a moving-average speed estimate
//! - Session orchestration for both roles
//!
//! ## Transfer Protocol
//!
//! - Default chunk size: 256 KiB
//! - One file at a time, chunks in index order
//! - Sender pauses while more than 8 MiB is queued in the channel
//! - No per-chunk acknowledgement; the channel is ordered and reliable

pub mod assembler;
pub mod controller;
pub mod progress;
pub mod pump;
pub mod speed;

pub use assembler::{AssembledFile, ChunkAccepted, ReceiveAssembler};
pub use controller::TransferController;
pub use progress::{
    ReceivedFile, Role, Session, TransferObserver, TransferProgress, TransferSnapshot,
    TransferStatus,
};
pub use pump::SendPump;
pub use speed::SpeedEstimator;

use std::time::Duration;

/// Configuration for a transfer session.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Pending-bytes level above which the sender waits
    pub backpressure_threshold: usize,
    /// Interval between gauge checks while waiting
    pub poll_interval: Duration,
    /// Pause between consecutive files
    pub inter_file_delay: Duration,
    /// Path-backed files above this size are read chunk by chunk
    pub buffer_limit: u64,
    /// Largest file this session will send or accept (None for unlimited)
    pub max_file_size: Option<u64>,
    /// Most chunks an incoming file may announce
    pub max_chunks: u32,
    /// Discard files that arrive with missing chunks instead of delivering them
    pub strict_completion: bool,
    /// Time allowed for the channel to open
    pub connect_timeout: Duration,
}

impl Default for TransferConfig {
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
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_config_default() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_size, crate::DEFAULT_CHUNK_SIZE);
        assert_eq!(config.backpressure_threshold, 8 * 1024 * 1024);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.inter_file_delay, Duration::from_millis(50));
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert!(config.max_file_size.is_none());
        assert_eq!(config.max_chunks, 4 * 1024 * 1024);
        assert!(!config.strict_completion);
    }
}
