//! Common test utilities for `HyperDrop` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hyperdrop_core::channel::{memory, Channel, ChannelEvent, ChannelEvents};
use hyperdrop_core::protocol::{decode_frame, Frame, Message};
use hyperdrop_core::transfer::{ReceivedFile, TransferObserver};
use hyperdrop_core::{Error, Result};

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &std::path::Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Observer that keeps everything it is told.
#[derive(Debug, Default)]
pub struct Recorder {
    pub files: Vec<ReceivedFile>,
    pub errors: Vec<String>,
}

impl TransferObserver for Recorder {
    fn file_received(&mut self, file: ReceivedFile) {
        self.files.push(file);
    }

    fn error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}

/// Drain every event already queued on `events`, decoding frames.
pub fn drain_messages(events: &mut ChannelEvents) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Some(event) = events.try_next() {
        if let ChannelEvent::Message(frame) = event {
            messages.push(decode_frame(&frame).expect("sender produced an undecodable frame"));
        }
    }
    messages
}

/// Create a connected in-process pair.
pub fn channel_pair() -> (
    (memory::MemoryChannel, ChannelEvents),
    (memory::MemoryChannel, ChannelEvents),
) {
    memory::pair()
}

/// A channel whose pending-bytes gauge is set by the test.
///
/// Every frame sent is recorded together with the gauge reading and the
/// clock at the moment it was accepted.
#[derive(Debug, Clone, Default)]
pub struct GaugedChannel {
    pub pending: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
    pub accumulate: Arc<AtomicBool>,
    pub sent: Arc<Mutex<Vec<(usize, Frame)>>>,
    pub sent_at: Arc<Mutex<Vec<tokio::time::Instant>>>,
}

impl GaugedChannel {
    pub fn set_pending(&self, bytes: usize) {
        self.pending.store(bytes, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Make every send add its length to the gauge, like a real queue.
    pub fn accumulating(self) -> Self {
        self.accumulate.store(true, Ordering::SeqCst);
        self
    }

    /// Drain `bytes` from the gauge.
    pub fn deliver(&self, bytes: usize) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    /// Decoded frames sent so far, each with the time it was accepted.
    pub fn timeline(&self) -> Vec<(tokio::time::Instant, Message)> {
        let sent = self.sent.lock().unwrap();
        let times = self.sent_at.lock().unwrap();
        times
            .iter()
            .zip(sent.iter())
            .map(|(at, (_, frame))| (*at, decode_frame(frame).unwrap()))
            .collect()
    }

    /// Gauge readings taken when each chunk frame was accepted.
    pub fn chunk_readings(&self) -> Vec<usize> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, frame)| matches!(frame, Frame::Binary(_)))
            .map(|(reading, _)| *reading)
            .collect()
    }
}

#[async_trait]
impl Channel for GaugedChannel {
    async fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelFault("closed".to_string()));
        }
        let reading = self.pending.load(Ordering::SeqCst);
        if self.accumulate.load(Ordering::SeqCst) {
            self.pending.fetch_add(frame.len(), Ordering::SeqCst);
        }
        self.sent.lock().unwrap().push((reading, frame));
        self.sent_at.lock().unwrap().push(tokio::time::Instant::now());
        Ok(())
    }

    fn pending_bytes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
