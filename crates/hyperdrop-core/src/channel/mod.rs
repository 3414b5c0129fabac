//! Message channel abstraction.
//!
//! The engine never talks to a socket or a WebRTC data channel directly. It
//! is handed a [`Channel`] for sending and a [`ChannelEvents`] stream for
//! everything the transport reports: open, incoming frames, close and errors.
//!
//! A channel must be ordered and reliable, and must expose how many bytes it
//! has accepted but not yet delivered. The send pump uses that gauge for
//! backpressure.
//!
//! Two reference transports are provided:
//!
//! - [`memory`] - an in-process connected pair, used by tests and demos
//! - [`tcp`] - length-prefixed frames over a TCP stream, used by the CLI

pub mod memory;
pub mod tcp;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::Frame;

/// Sending half of an open, ordered, reliable message transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Queue a frame for delivery.
    ///
    /// Returns once the transport has accepted the frame, not once the peer
    /// has received it.
    async fn send(&self, frame: Frame) -> Result<()>;

    /// Bytes accepted by [`send`](Self::send) but not yet delivered.
    fn pending_bytes(&self) -> usize;

    /// Whether frames can still be sent.
    fn is_open(&self) -> bool;

    /// Close the channel.
    ///
    /// Synchronous and idempotent. Frames already accepted may still be
    /// delivered; no further frames are accepted.
    fn close(&self);
}

/// Something the transport reports to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is open and usable
    Open,
    /// A frame arrived from the peer
    Message(Frame),
    /// The channel closed
    Closed,
    /// The transport failed; the string is for logs only
    Error(String),
}

/// Stream of events reported by a transport.
#[derive(Debug)]
pub struct ChannelEvents {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
    on_delivered: Option<memory::DeliveryGauge>,
}

impl ChannelEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        Self {
            rx,
            on_delivered: None,
        }
    }

    pub(crate) fn with_gauge(
        rx: mpsc::UnboundedReceiver<ChannelEvent>,
        gauge: memory::DeliveryGauge,
    ) -> Self {
        Self {
            rx,
            on_delivered: Some(gauge),
        }
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the transport has gone away and every queued
    /// event has been consumed.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        let event = self.rx.recv().await?;
        if let (Some(gauge), ChannelEvent::Message(frame)) = (&self.on_delivered, &event) {
            gauge.delivered(frame.len());
        }
        Some(event)
    }

    /// Take the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<ChannelEvent> {
        let event = self.rx.try_recv().ok()?;
        if let (Some(gauge), ChannelEvent::Message(frame)) = (&self.on_delivered, &event) {
            gauge.delivered(frame.len());
        }
        Some(event)
    }
}
