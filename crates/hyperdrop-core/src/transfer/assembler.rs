//! Receive-side reassembly.
//!
//! The assembler holds at most one file in flight. Chunks are stored by
//! their index, so arrival order never affects the result. Storage grows
//! with the chunks that actually arrive, never with what the metadata
//! announces.

use std::collections::BTreeMap;
use std::mem;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::file::FileMetadata;
use crate::protocol::{ChunkFrame, MAX_CHUNK_PAYLOAD};

/// Outcome of offering a chunk to the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAccepted {
    /// Stored; carries the file's running byte count
    Stored {
        /// Sum of all filled slots
        bytes_received: u64,
    },
    /// Index past the end of the table; dropped
    OutOfRange,
    /// Payload too large for a chunk or for the announced size; dropped
    Oversized,
    /// No file in flight; dropped
    NotReceiving,
}

/// A file put back together.
#[derive(Debug, Clone)]
pub struct AssembledFile {
    /// Metadata the file was announced with
    pub metadata: FileMetadata,
    /// Filled chunks concatenated in index order
    pub data: Vec<u8>,
    /// Indexes with no chunk
    pub missing: Vec<u32>,
    /// Time since the metadata arrived
    pub elapsed: Duration,
}

impl AssembledFile {
    /// What is wrong with this file, if anything.
    ///
    /// Missing chunks take precedence over a length that differs from the
    /// announced size.
    pub fn defect(&self) -> Option<Error> {
        if !self.missing.is_empty() {
            return Some(Error::IncompleteTransfer {
                name: self.metadata.name.clone(),
                missing: self.missing.len(),
            });
        }

        let actual = self.data.len() as u64;
        if actual != self.metadata.size {
            return Some(Error::SizeMismatch {
                name: self.metadata.name.clone(),
                expected: self.metadata.size,
                actual,
            });
        }
        None
    }
}

#[derive(Debug)]
struct ChunkTable {
    metadata: FileMetadata,
    chunks: BTreeMap<u32, Vec<u8>>,
    filled_bytes: u64,
    started: Instant,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    AwaitingMetadata,
    Receiving(ChunkTable),
}

/// Reassembles one file at a time from indexed chunks.
#[derive(Debug)]
pub struct ReceiveAssembler {
    state: State,
    strict: bool,
    max_chunks: u32,
    max_file_size: Option<u64>,
}

impl Default for ReceiveAssembler {
    fn default() -> Self {
        Self {
            state: State::AwaitingMetadata,
            strict: false,
            max_chunks: crate::DEFAULT_MAX_CHUNKS,
            max_file_size: None,
        }
    }
}

impl ReceiveAssembler {
    /// Create an assembler that delivers partial files.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail files with missing chunks instead of delivering them.
    #[must_use]
    pub fn with_strict_completion(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Refuse files announcing more than `max_chunks` chunks or more than
    /// `max_file_size` bytes.
    #[must_use]
    pub fn with_limits(mut self, max_chunks: u32, max_file_size: Option<u64>) -> Self {
        self.max_chunks = max_chunks;
        self.max_file_size = max_file_size;
        self
    }

    /// Start a new file.
    ///
    /// A file already in flight is abandoned.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedFrame`] if the chunk count is impossible for the
    ///   announced size, or above the chunk limit
    /// - [`Error::CapacityExceeded`] if the file is larger than the size limit
    pub fn begin(&mut self, metadata: FileMetadata, now: Instant) -> Result<()> {
        let reachable = u64::from(metadata.total_chunks).saturating_mul(MAX_CHUNK_PAYLOAD as u64);
        if !metadata.is_plausible() || metadata.size > reachable {
            return Err(Error::MalformedFrame(format!(
                "'{}' announces {} chunks for {} bytes",
                metadata.name, metadata.total_chunks, metadata.size
            )));
        }
        if metadata.total_chunks > self.max_chunks {
            return Err(Error::MalformedFrame(format!(
                "'{}' announces {} chunks, limit is {}",
                metadata.name, metadata.total_chunks, self.max_chunks
            )));
        }
        if let Some(limit) = self.max_file_size {
            if metadata.size > limit {
                return Err(Error::CapacityExceeded {
                    name: metadata.name,
                    size: metadata.size,
                    limit,
                });
            }
        }

        if let State::Receiving(table) = &self.state {
            tracing::warn!(
                "Metadata for '{}' arrived while '{}' was incomplete, abandoning it",
                metadata.name,
                table.metadata.name
            );
        }

        tracing::debug!(
            "Receiving '{}' ({} bytes, {} chunks)",
            metadata.name,
            metadata.size,
            metadata.total_chunks
        );

        self.state = State::Receiving(ChunkTable {
            metadata,
            chunks: BTreeMap::new(),
            filled_bytes: 0,
            started: now,
        });
        Ok(())
    }

    /// Store a chunk in its slot. A repeated index overwrites the earlier payload.
    pub fn accept_chunk(&mut self, chunk: ChunkFrame) -> ChunkAccepted {
        let State::Receiving(table) = &mut self.state else {
            tracing::warn!("Chunk {} arrived with no file in flight, dropping", chunk.index);
            return ChunkAccepted::NotReceiving;
        };

        if chunk.index >= table.metadata.total_chunks {
            tracing::warn!(
                "Chunk {} out of range for '{}' ({} chunks), dropping",
                chunk.index,
                table.metadata.name,
                table.metadata.total_chunks
            );
            return ChunkAccepted::OutOfRange;
        }

        let added = chunk.payload.len() as u64;
        let replaced = table.chunks.get(&chunk.index).map_or(0, |p| p.len() as u64);
        let total = table.filled_bytes - replaced + added;
        if chunk.payload.len() > MAX_CHUNK_PAYLOAD || total > table.metadata.size {
            tracing::warn!(
                "Chunk {} of '{}' carries {} bytes, more than the file allows, dropping",
                chunk.index,
                table.metadata.name,
                added
            );
            return ChunkAccepted::Oversized;
        }

        table.chunks.insert(chunk.index, chunk.payload);
        table.filled_bytes = total;

        ChunkAccepted::Stored {
            bytes_received: table.filled_bytes,
        }
    }

    /// Close the file in flight and return its bytes.
    ///
    /// Returns `Ok(None)` if no file was in flight. The table is released
    /// whatever the outcome.
    ///
    /// # Errors
    ///
    /// In strict mode, returns [`Error::IncompleteTransfer`] if any slot is
    /// empty, or [`Error::SizeMismatch`] if the bytes do not add up to the
    /// announced size.
    pub fn finish(&mut self, now: Instant) -> Result<Option<AssembledFile>> {
        let State::Receiving(mut table) = mem::take(&mut self.state) else {
            tracing::warn!("File completion with no file in flight, ignoring");
            return Ok(None);
        };

        let capacity = usize::try_from(table.filled_bytes).unwrap_or(0);
        let mut data = Vec::with_capacity(capacity);
        let mut missing = Vec::new();

        for index in 0..table.metadata.total_chunks {
            match table.chunks.remove(&index) {
                Some(payload) => data.extend_from_slice(&payload),
                None => missing.push(index),
            }
        }

        let file = AssembledFile {
            metadata: table.metadata,
            data,
            missing,
            elapsed: now.saturating_duration_since(table.started),
        };

        if let Some(defect) = file.defect() {
            tracing::warn!("{}", defect);
            if self.strict {
                return Err(defect);
            }
        }

        Ok(Some(file))
    }

    /// Drop the file in flight, if any.
    pub fn clear(&mut self) {
        self.state = State::AwaitingMetadata;
    }

    /// Returns true while a file is in flight.
    pub fn is_receiving(&self) -> bool {
        matches!(self.state, State::Receiving(_))
    }

    /// Bytes stored for the file in flight.
    pub fn bytes_received(&self) -> u64 {
        match &self.state {
            State::Receiving(table) => table.filled_bytes,
            State::AwaitingMetadata => 0,
        }
    }

    /// Metadata of the file in flight.
    pub fn metadata(&self) -> Option<&FileMetadata> {
        match &self.state {
            State::Receiving(table) => Some(&table.metadata),
            State::AwaitingMetadata => None,
        }
    }
}
