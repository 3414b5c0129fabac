//! HyperDrop wire protocol implementation.
//!
//! Two kinds of messages share one ordered channel: binary chunk frames and
//! UTF-8 JSON control messages.
//!
//! ## Chunk Frame Format
//!
//! ```text
//! ┌────────────────┬──────────────────────────────────────────┐
//! │  Chunk index   │              Chunk payload               │
//! │ 4 bytes (u32,  │        (up to chunk size, raw bytes)     │
//! │ little-endian) │                                          │
//! └────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! There is no checksum; integrity is the transport's responsibility.
//!
//! ## Control Messages
//!
//! JSON objects discriminated by `type`:
//!
//! | `type`          | Payload                      |
//! |-----------------|------------------------------|
//! | `device-name`   | `{ "name": string }`         |
//! | `total-files`   | `{ "count": number }`        |
//! | `file-metadata` | `{ "metadata": FileMetadata }` |
//! | `file-complete` | none                         |
//! | `all-complete`  | none                         |
//!
//! ## Sequence
//!
//! ```text
//! device-name                (each side, on open)
//! total-files {count}
//! ┌ file-metadata            (per file)
//! │ chunk 0 .. chunk N-1
//! └ file-complete
//! all-complete
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::file::FileMetadata;

/// Size of the chunk index prefix in bytes
pub const CHUNK_HEADER_SIZE: usize = 4;

/// Largest chunk payload a receiver will store
pub const MAX_CHUNK_PAYLOAD: usize = crate::channel::tcp::MAX_FRAME_SIZE - CHUNK_HEADER_SIZE;

/// A message as carried by a channel.
///
/// Frames always own their bytes. Transports that deliver borrowed or
/// recycled buffers must copy into a `Frame` before handing it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Binary chunk frame
    Binary(Vec<u8>),
    /// Text control frame
    Text(String),
}

impl Frame {
    /// Number of bytes this frame occupies on the wire.
    pub fn len(&self) -> usize {
        match self {
            Self::Binary(bytes) => bytes.len(),
            Self::Text(text) => text.len(),
        }
    }

    /// Returns true if the frame carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded chunk frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// Zero-based chunk index within the current file
    pub index: u32,
    /// Chunk bytes, owned by the receiver
    pub payload: Vec<u8>,
}

/// Control messages exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Announces the sender's display name
    DeviceName {
        /// Display name
        name: String,
    },
    /// Announces how many files the set contains
    TotalFiles {
        /// Number of files that follow
        count: u32,
    },
    /// Describes the file whose chunks follow
    FileMetadata {
        /// File description
        metadata: FileMetadata,
    },
    /// The described file has been fully sent
    FileComplete,
    /// The whole set has been sent
    AllComplete,
}

impl ControlMessage {
    /// Wire name of this message type.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DeviceName { .. } => "device-name",
            Self::TotalFiles { .. } => "total-files",
            Self::FileMetadata { .. } => "file-metadata",
            Self::FileComplete => "file-complete",
            Self::AllComplete => "all-complete",
        }
    }
}

/// Encode a chunk as `[u32 LE index][payload]`.
#[must_use]
pub fn encode_chunk(index: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CHUNK_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&index.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Decode a binary chunk frame.
///
/// The payload is copied into fresh storage, so the returned frame never
/// aliases the input buffer.
///
/// # Errors
///
/// Returns [`Error::MalformedFrame`] if the frame is shorter than the index prefix.
pub fn decode_chunk(frame: &[u8]) -> Result<ChunkFrame> {
    let Some((header, payload)) = frame.split_first_chunk::<CHUNK_HEADER_SIZE>() else {
        return Err(Error::MalformedFrame(format!(
            "chunk frame too short: {} bytes",
            frame.len()
        )));
    };

    Ok(ChunkFrame {
        index: u32::from_le_bytes(*header),
        payload: payload.to_vec(),
    })
}

/// Encode a control message as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_control(message: &ControlMessage) -> Result<String> {
    serde_json::to_string(message).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a JSON control message.
///
/// # Errors
///
/// Returns [`Error::MalformedFrame`] if the text is not JSON, has no `type`,
/// has an unknown `type`, or lacks the fields its type requires.
pub fn decode_control(text: &str) -> Result<ControlMessage> {
    serde_json::from_str(text).map_err(|e| Error::MalformedFrame(format!("control message: {e}")))
}

/// Build a text frame from a control message.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn control_frame(message: &ControlMessage) -> Result<Frame> {
    encode_control(message).map(Frame::Text)
}

/// A frame decoded into its protocol meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A file chunk
    Chunk(ChunkFrame),
    /// A control message
    Control(ControlMessage),
}

/// Decode any frame.
///
/// # Errors
///
/// Returns [`Error::MalformedFrame`] if the frame cannot be decoded.
pub fn decode_frame(frame: &Frame) -> Result<Message> {
    match frame {
        Frame::Binary(bytes) => decode_chunk(bytes).map(Message::Chunk),
        Frame::Text(text) => decode_control(text).map(Message::Control),
    }
}
