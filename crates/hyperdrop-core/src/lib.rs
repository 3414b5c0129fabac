//! # HyperDrop Core Library
//!
//! `hyperdrop-core` provides the transfer engine behind HyperDrop, a
//! peer-to-peer file sharing tool. Two peers that already share an open,
//! ordered, reliable message channel use it to exchange files directly.
//!
//! ## Features
//!
//! - **Chunked framing**: files are split into fixed-size chunks tagged with
//!   a little-endian index, interleaved with JSON control messages
//! - **Lossless reassembly**: chunks are placed by index, never by arrival order
//! - **Backpressure**: the sender waits while the channel has too many bytes queued
//! - **Live progress**: moving-average throughput and ETA on both sides
//!
//! ## Modules
//!
//! - [`channel`] - Message channel abstraction and reference transports
//! - [`config`] - Configuration management
//! - [`mod@file`] - File metadata, chunk math and outgoing file sources
//! - [`protocol`] - Wire codec for chunk frames and control messages
//! - [`transfer`] - Send pump, receive assembler, speed estimator and controller
//!
//! ## Example
//!
//! ```rust,ignore
//! use hyperdrop_core::channel::memory;
//! use hyperdrop_core::transfer::{Role, TransferConfig, TransferController};
//!
//! let ((tx_chan, _tx_events), (rx_chan, mut rx_events)) = memory::pair();
//! let mut sender = TransferController::new(TransferConfig::default(), "Laptop", ());
//! sender.attach(tx_chan, Role::Sender).await?;
//! sender.send_files(files).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod channel;
pub mod config;
pub mod error;
pub mod file;
pub mod protocol;
pub mod transfer;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chunk size for file transfers (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Pending-bytes level above which the sender stops queueing chunks (8 MiB)
pub const DEFAULT_BACKPRESSURE_THRESHOLD: usize = 8 * 1024 * 1024;

/// Default interval between backpressure gauge checks, in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5;

/// Default pause between consecutive files of a set, in milliseconds
pub const DEFAULT_INTER_FILE_DELAY_MS: u64 = 50;

/// Default time allowed for a channel to open, in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Files above this size are streamed from disk instead of buffered whole (256 MiB)
pub const DEFAULT_BUFFER_LIMIT: u64 = 256 * 1024 * 1024;

/// Most chunks a receiver accepts for one file (1 TiB at the default chunk size)
pub const DEFAULT_MAX_CHUNKS: u32 = 4 * 1024 * 1024;

/// Default TCP listen address for the reference transport
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:52530";
