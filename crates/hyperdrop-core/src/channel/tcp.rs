//! TCP reference transport.
//!
//! Carries [`Frame`]s over a TCP stream using a small length-prefixed
//! envelope. TCP is ordered and reliable, which is all the engine needs.
//!
//! ## Envelope Format
//!
//! ```text
//! ┌────────────┬────────────┬─────────────────┬──────────────────┐
//! │   Magic    │    Kind    │     Length      │     Payload      │
//! │  4 bytes   │   1 byte   │ 4 bytes (BE u32)│ (Length bytes)   │
//! └────────────┴────────────┴─────────────────┴──────────────────┘
//! ```
//!
//! - Magic: `0x48 0x44 0x52 0x50` ("HDRP")
//! - Kind: `0x01` binary, `0x02` UTF-8 text
//!
//! Frames are queued to a writer task. The pending-bytes gauge counts bytes
//! queued but not yet written to the socket.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Channel, ChannelEvent, ChannelEvents};
use crate::error::{Error, Result};
use crate::protocol::Frame;

/// Envelope magic bytes: "HDRP"
pub const MAGIC: [u8; 4] = [0x48, 0x44, 0x52, 0x50];

/// Envelope header size in bytes
pub const HEADER_SIZE: usize = 9;

/// Maximum payload size of one envelope (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const KIND_BINARY: u8 = 0x01;
const KIND_TEXT: u8 = 0x02;

/// Write one frame to a stream.
///
/// # Errors
///
/// Returns an error if the frame is too large or the write fails.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (kind, payload) = match frame {
        Frame::Binary(bytes) => (KIND_BINARY, bytes.as_slice()),
        Frame::Text(text) => (KIND_TEXT, text.as_bytes()),
    };

    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::ChannelFault(format!(
            "frame too large: {} bytes",
            payload.len()
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    let length = payload.len() as u32;

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC);
    header[4] = kind;
    header[5..9].copy_from_slice(&length.to_be_bytes());

    writer.write_all(&header).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;

    Ok(())
}

/// Read one frame from a stream.
///
/// Returns `Ok(None)` on a clean end of stream between frames.
///
/// # Errors
///
/// Returns [`Error::ChannelFault`] if the stream is corrupt or fails, and
/// [`Error::MalformedFrame`] for a well-delimited frame whose content is
/// unusable (unknown kind, text that is not UTF-8). The stream stays in sync
/// after a `MalformedFrame`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::ChannelFault(e.to_string())),
    }

    if header[0..4] != MAGIC {
        return Err(Error::ChannelFault("invalid magic bytes".to_string()));
    }

    let kind = header[4];
    let length = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(Error::ChannelFault(format!("frame too large: {length} bytes")));
    }

    let mut payload = vec![0u8; length];
    if length > 0 {
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| Error::ChannelFault(e.to_string()))?;
    }

    match kind {
        KIND_BINARY => Ok(Some(Frame::Binary(payload))),
        KIND_TEXT => String::from_utf8(payload)
            .map(|text| Some(Frame::Text(text)))
            .map_err(|_| Error::MalformedFrame("text frame is not UTF-8".to_string())),
        other => Err(Error::MalformedFrame(format!("unknown frame kind: {other:#x}"))),
    }
}

/// A channel over a TCP stream.
#[derive(Debug)]
pub struct TcpChannel {
    queue: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    pending: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    peer_addr: Option<SocketAddr>,
}

impl TcpChannel {
    /// Connect to a listening peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the connection is not established in
    /// time, or an I/O error if it is refused.
    pub async fn connect<A>(addr: A, timeout: Duration) -> Result<(Self, ChannelEvents)>
    where
        A: ToSocketAddrs,
    {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(timeout.as_secs()))??;
        tracing::debug!("Connected to {:?}", stream.peer_addr().ok());
        Ok(Self::from_stream(stream))
    }

    /// Accept one incoming connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if nobody connects in time.
    pub async fn accept(listener: &TcpListener, timeout: Duration) -> Result<(Self, ChannelEvents)> {
        let (stream, addr) = tokio::time::timeout(timeout, listener.accept())
            .await
            .map_err(|_| Error::Timeout(timeout.as_secs()))??;
        tracing::info!("Connection from {}", addr);
        Ok(Self::from_stream(stream))
    }

    /// Wrap an established stream. Must be called inside a tokio runtime.
    pub fn from_stream(stream: TcpStream) -> (Self, ChannelEvents) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicBool::new(true));

        let _ = events_tx.send(ChannelEvent::Open);

        tokio::spawn(write_loop(
            write_half,
            queue_rx,
            Arc::clone(&pending),
            Arc::clone(&open),
            events_tx.clone(),
        ));
        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&open), events_tx));

        (
            Self {
                queue: Mutex::new(Some(queue_tx)),
                pending,
                open,
                reader,
                peer_addr,
            },
            ChannelEvents::new(events_rx),
        )
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Frame>,
    pending: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = queue.recv().await {
        let len = frame.len();
        let result = write_frame(&mut writer, &frame).await;
        pending.fetch_sub(len, Ordering::SeqCst);

        if let Err(e) = result {
            tracing::warn!("TCP write failed: {}", e);
            open.store(false, Ordering::SeqCst);
            let _ = events.send(ChannelEvent::Error(e.to_string()));
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("TCP shutdown failed: {}", e);
    }
}

async fn read_loop<R>(
    mut reader: R,
    open: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                if events.send(ChannelEvent::Message(frame)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                open.store(false, Ordering::SeqCst);
                let _ = events.send(ChannelEvent::Closed);
                break;
            }
            Err(Error::MalformedFrame(reason)) => {
                tracing::warn!("Dropping malformed TCP frame: {}", reason);
            }
            Err(e) => {
                open.store(false, Ordering::SeqCst);
                let _ = events.send(ChannelEvent::Error(e.to_string()));
                break;
            }
        }
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelFault("channel closed".to_string()));
        }

        let len = frame.len();
        let guard = self
            .queue
            .lock()
            .map_err(|_| Error::ChannelFault("channel state poisoned".to_string()))?;
        let Some(queue) = guard.as_ref() else {
            return Err(Error::ChannelFault("channel closed".to_string()));
        };

        self.pending.fetch_add(len, Ordering::SeqCst);
        if queue.send(frame).is_err() {
            self.pending.fetch_sub(len, Ordering::SeqCst);
            return Err(Error::ChannelFault("writer stopped".to_string()));
        }
        Ok(())
    }

    fn pending_bytes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.queue.lock() {
            guard.take();
        }
        self.reader.abort();
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.close();
    }
}
