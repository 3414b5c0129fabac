//! Send-side chunk pump.
//!
//! Sends one file as `file-metadata`, its chunks in index order, then
//! `file-complete`. Before every chunk the pump checks the channel's
//! pending-bytes gauge and sleeps while it is above the threshold.

use std::io;
use std::ops::Range;
use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::TransferConfig;
use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::file::{chunk_range, FileMetadata, FileSource, OutgoingFile};
use crate::protocol::{self, ControlMessage, Frame};

/// Drives one file at a time into a channel.
#[derive(Debug)]
pub struct SendPump<'a, C: Channel + ?Sized> {
    channel: &'a C,
    config: &'a TransferConfig,
}

impl<'a, C: Channel + ?Sized> SendPump<'a, C> {
    /// Create a pump over `channel`.
    pub fn new(channel: &'a C, config: &'a TransferConfig) -> Self {
        Self { channel, config }
    }

    /// Send `file`, described by `metadata`.
    ///
    /// `on_progress` is called after every chunk with the bytes sent so far.
    /// Returns once every frame has been handed to the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelFault`] if the channel fails or closes, and an
    /// I/O error if the file cannot be read.
    pub async fn send_file<F>(
        &self,
        file: &OutgoingFile,
        metadata: &FileMetadata,
        mut on_progress: F,
    ) -> Result<()>
    where
        F: FnMut(u64),
    {
        self.send_control(&ControlMessage::FileMetadata {
            metadata: metadata.clone(),
        })
        .await?;

        match &file.source {
            FileSource::Memory(data) => {
                self.send_buffered(data, metadata, &mut on_progress).await?;
            }
            FileSource::Path(path) if metadata.size > self.config.buffer_limit => {
                tracing::debug!(
                    "Streaming '{}' from disk ({} bytes)",
                    metadata.name,
                    metadata.size
                );
                self.send_streamed(path, metadata, &mut on_progress).await?;
            }
            FileSource::Path(path) => {
                let data = tokio::fs::read(path).await?;
                self.send_buffered(&data, metadata, &mut on_progress).await?;
            }
        }

        self.send_control(&ControlMessage::FileComplete).await?;
        tracing::debug!(
            "Queued '{}' ({} chunks)",
            metadata.name,
            metadata.total_chunks
        );
        Ok(())
    }

    async fn send_buffered<F>(
        &self,
        data: &[u8],
        metadata: &FileMetadata,
        on_progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(u64),
    {
        let mut sent = 0u64;
        for index in 0..metadata.total_chunks {
            let range = self.range_of(index, metadata)?;
            let payload = data.get(range).ok_or_else(|| file_changed(&metadata.name))?;

            self.send_chunk(index, payload).await?;
            sent += payload.len() as u64;
            on_progress(sent);
        }
        Ok(())
    }

    async fn send_streamed<F>(
        &self,
        path: &Path,
        metadata: &FileMetadata,
        on_progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(u64),
    {
        let mut reader = File::open(path).await?;
        let mut buffer = vec![0u8; self.config.chunk_size];

        let mut sent = 0u64;
        for index in 0..metadata.total_chunks {
            let range = self.range_of(index, metadata)?;
            let payload = &mut buffer[..range.len()];
            reader.read_exact(payload).await.map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    file_changed(&metadata.name)
                } else {
                    Error::Io(e)
                }
            })?;

            self.send_chunk(index, payload).await?;
            sent += payload.len() as u64;
            on_progress(sent);
        }
        Ok(())
    }

    fn range_of(&self, index: u32, metadata: &FileMetadata) -> Result<Range<usize>> {
        let range = chunk_range(index, metadata.size, self.config.chunk_size);
        let start = usize::try_from(range.start).map_err(|_| file_changed(&metadata.name))?;
        let end = usize::try_from(range.end).map_err(|_| file_changed(&metadata.name))?;
        Ok(start..end)
    }

    async fn send_chunk(&self, index: u32, payload: &[u8]) -> Result<()> {
        self.wait_for_capacity().await?;
        self.channel
            .send(Frame::Binary(protocol::encode_chunk(index, payload)))
            .await
    }

    async fn send_control(&self, message: &ControlMessage) -> Result<()> {
        self.channel.send(protocol::control_frame(message)?).await
    }

    /// Sleep until the channel's queue is at or below the threshold.
    async fn wait_for_capacity(&self) -> Result<()> {
        let threshold = self.config.backpressure_threshold;
        if self.channel.pending_bytes() <= threshold {
            return Ok(());
        }

        tracing::trace!(
            "Backpressure: {} bytes pending, waiting",
            self.channel.pending_bytes()
        );

        while self.channel.pending_bytes() > threshold {
            if !self.channel.is_open() {
                return Err(Error::ChannelFault(
                    "channel closed during backpressure wait".to_string(),
                ));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Ok(())
    }
}

fn file_changed(name: &str) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("'{name}' changed size while being sent"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{memory, ChannelEvent};
    use crate::protocol::{decode_frame, Message};

    fn small_config(chunk_size: usize) -> TransferConfig {
        TransferConfig {
            chunk_size,
            ..TransferConfig::default()
        }
    }

    #[tokio::test]
    async fn test_frame_sequence() {
        let ((tx, _tx_events), (_rx, mut rx_events)) = memory::pair();
        let config = small_config(4);
        let file = OutgoingFile::from_bytes("a.txt", b"0123456789".to_vec());
        let metadata = FileMetadata::new(&file.name, file.size, &file.mime_type, 4).unwrap();

        let mut reported = Vec::new();
        SendPump::new(&tx, &config)
            .send_file(&file, &metadata, |sent| reported.push(sent))
            .await
            .unwrap();
        assert_eq!(reported, vec![4, 8, 10]);

        assert_eq!(rx_events.next().await, Some(ChannelEvent::Open));
        let mut messages = Vec::new();
        while let Some(ChannelEvent::Message(frame)) = rx_events.try_next() {
            messages.push(decode_frame(&frame).unwrap());
        }

        assert_eq!(messages.len(), 5);
        assert!(matches!(
            &messages[0],
            Message::Control(ControlMessage::FileMetadata { metadata: m }) if m.total_chunks == 3
        ));
        let chunks: Vec<_> = messages[1..4]
            .iter()
            .map(|m| match m {
                Message::Chunk(c) => (c.index, c.payload.clone()),
                Message::Control(_) => panic!("expected chunk"),
            })
            .collect();
        assert_eq!(
            chunks,
            vec![
                (0, b"0123".to_vec()),
                (1, b"4567".to_vec()),
                (2, b"89".to_vec())
            ]
        );
        assert_eq!(messages[4], Message::Control(ControlMessage::FileComplete));
    }

    #[tokio::test]
    async fn test_streamed_path_matches_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"abcdefghij").unwrap();

        let ((tx, _tx_events), (_rx, mut rx_events)) = memory::pair();
        let config = TransferConfig {
            chunk_size: 3,
            buffer_limit: 4,
            ..TransferConfig::default()
        };
        let file = OutgoingFile::from_path(&path).unwrap();
        let metadata = FileMetadata::new(&file.name, file.size, &file.mime_type, 3).unwrap();

        SendPump::new(&tx, &config)
            .send_file(&file, &metadata, |_| {})
            .await
            .unwrap();

        let _ = rx_events.next().await;
        let mut data = Vec::new();
        while let Some(ChannelEvent::Message(frame)) = rx_events.try_next() {
            if let Message::Chunk(chunk) = decode_frame(&frame).unwrap() {
                data.extend_from_slice(&chunk.payload);
            }
        }
        assert_eq!(data, b"abcdefghij");
    }

    #[tokio::test]
    async fn test_empty_file_sends_no_chunks() {
        let ((tx, _tx_events), (_rx, mut rx_events)) = memory::pair();
        let config = TransferConfig::default();
        let file = OutgoingFile::from_bytes("empty", Vec::new());
        let metadata = FileMetadata::new(&file.name, 0, &file.mime_type, config.chunk_size).unwrap();

        SendPump::new(&tx, &config)
            .send_file(&file, &metadata, |_| panic!("no chunks expected"))
            .await
            .unwrap();

        let _ = rx_events.next().await;
        let mut count = 0;
        while rx_events.try_next().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_send_on_closed_channel_fails() {
        let ((tx, _tx_events), (_rx, _rx_events)) = memory::pair();
        tx.close();

        let config = TransferConfig::default();
        let file = OutgoingFile::from_bytes("a", vec![1]);
        let metadata = FileMetadata::new("a", 1, "text/plain", config.chunk_size).unwrap();
        let result = SendPump::new(&tx, &config)
            .send_file(&file, &metadata, |_| {})
            .await;
        assert!(matches!(result, Err(Error::ChannelFault(_))));
    }

    #[tokio::test]
    async fn test_truncated_memory_source_is_an_error() {
        let ((tx, _tx_events), (_rx, _rx_events)) = memory::pair();
        let config = small_config(4);
        let mut file = OutgoingFile::from_bytes("short", vec![0; 3]);
        file.size = 8;
        let metadata = FileMetadata::new("short", 8, "text/plain", 4).unwrap();

        let result = SendPump::new(&tx, &config)
            .send_file(&file, &metadata, |_| {})
            .await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
