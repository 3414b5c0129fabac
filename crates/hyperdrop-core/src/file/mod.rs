//! File operations for HyperDrop.
//!
//! This module handles:
//! - Per-file metadata announced to the receiver
//! - Chunk math (chunk counts and byte ranges)
//! - Outgoing file sources (in-memory buffers or paths on disk)
//! - Output naming for received files
//!
//! ## Chunk Layout
//!
//! A file of `N` bytes is split into `ceil(N / chunk_size)` chunks. Every
//! chunk is exactly `chunk_size` bytes except the last, which holds the
//! remainder (or a full chunk when `N` is an exact multiple). An empty file
//! has zero chunks.

use std::ops::Range;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MIME type used when nothing better can be guessed.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Metadata for a file being transferred.
///
/// Serialized field names match the wire format exactly:
/// `id`, `name`, `size`, `type`, `totalChunks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Opaque per-file identifier
    pub id: String,
    /// File name as chosen by the sender
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// MIME type
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Number of chunk frames that follow
    pub total_chunks: u32,
}

impl FileMetadata {
    /// Create metadata for a file about to be sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if the file would need more chunks
    /// than a `u32` index can address.
    pub fn new(name: &str, size: u64, mime_type: &str, chunk_size: usize) -> Result<Self> {
        let count = chunk_count(size, chunk_size);
        let total_chunks = u32::try_from(count).map_err(|_| Error::CapacityExceeded {
            name: name.to_string(),
            size,
            limit: u64::from(u32::MAX).saturating_mul(chunk_size as u64),
        })?;

        Ok(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            size,
            mime_type: mime_type.to_string(),
            total_chunks,
        })
    }

    /// Check that the announced chunk count is possible for the announced size.
    ///
    /// Every chunk carries at least one byte, so a file can never have more
    /// chunks than bytes, and an empty file has none.
    #[must_use]
    pub fn is_plausible(&self) -> bool {
        u64::from(self.total_chunks) <= self.size && (self.size == 0 || self.total_chunks > 0)
    }
}

/// Number of chunks needed for a file of `size` bytes.
#[must_use]
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    let chunk = chunk_size.max(1) as u64;
    size.div_ceil(chunk)
}

/// Byte range covered by chunk `index` of a file of `size` bytes.
#[must_use]
pub fn chunk_range(index: u32, size: u64, chunk_size: usize) -> Range<u64> {
    let chunk = chunk_size.max(1) as u64;
    let start = (u64::from(index) * chunk).min(size);
    let end = (start + chunk).min(size);
    start..end
}

/// Guess a MIME type from a file name.
#[must_use]
pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map_or_else(|| DEFAULT_MIME_TYPE.to_string(), |m| m.to_string())
}

/// Where the bytes of an outgoing file come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Bytes already held in memory
    Memory(Vec<u8>),
    /// A file on disk, read when the file's turn comes
    Path(PathBuf),
}

/// A file queued for sending.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    /// Name announced to the receiver
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// MIME type
    pub mime_type: String,
    /// Byte source
    pub source: FileSource,
}

impl OutgoingFile {
    /// Create an outgoing file from an in-memory buffer.
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        Self {
            mime_type: guess_mime(&name),
            size: data.len() as u64,
            name,
            source: FileSource::Memory(data),
        }
    }

    /// Create an outgoing file from a path on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist or is not a regular file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            mime_type: guess_mime(&name),
            size: metadata.len(),
            name,
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Override the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// Reduce a peer-supplied file name to a single safe path component.
///
/// Directory parts, `.`/`..` and empty names are stripped so a received
/// file can never escape the output directory.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let normalized = name.replace('\\', "/");
    let candidate = Path::new(&normalized)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .next_back()
        .unwrap_or("")
        .trim();

    if candidate.is_empty() {
        "unknown".to_string()
    } else {
        candidate.to_string()
    }
}

/// Pick an output path under `dir` that does not exist yet.
///
/// `report.pdf` becomes `report (1).pdf`, `report (2).pdf`, ... on collision.
#[must_use]
pub fn unique_output_path(dir: &Path, name: &str) -> PathBuf {
    let safe = sanitize_file_name(name);
    let candidate = dir.join(&safe);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(&safe);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(safe.as_str())
        .to_string();
    let ext = path.extension().and_then(|e| e.to_str());

    (1u32..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
