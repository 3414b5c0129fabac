//! In-process channel pair.
//!
//! Both ends live in the same process and exchange frames over unbounded
//! tokio queues. The pending-bytes gauge of each end counts bytes sent but
//! not yet pulled out of the peer's [`ChannelEvents`], so a peer that stops
//! reading produces real backpressure.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Channel, ChannelEvent, ChannelEvents};
use crate::error::{Error, Result};
use crate::protocol::Frame;

/// Shared count of bytes in flight between a sender and its peer's event stream.
#[derive(Debug, Clone, Default)]
pub struct DeliveryGauge(Arc<AtomicUsize>);

impl DeliveryGauge {
    fn queued(&self, bytes: usize) {
        self.0.fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn delivered(&self, bytes: usize) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// One end of an in-process channel pair.
#[derive(Debug)]
pub struct MemoryChannel {
    peer_tx: mpsc::UnboundedSender<ChannelEvent>,
    pending: DeliveryGauge,
    open: Arc<AtomicBool>,
}

impl MemoryChannel {
    /// Simulate a transport failure: the channel stops accepting frames and
    /// the peer sees [`ChannelEvent::Error`].
    pub fn fail(&self, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.peer_tx.send(ChannelEvent::Error(reason.to_string()));
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelFault("channel closed".to_string()));
        }

        let len = frame.len();
        self.pending.queued(len);
        if self.peer_tx.send(ChannelEvent::Message(frame)).is_err() {
            self.pending.delivered(len);
            self.open.store(false, Ordering::SeqCst);
            return Err(Error::ChannelFault("peer went away".to_string()));
        }
        Ok(())
    }

    fn pending_bytes(&self) -> usize {
        self.pending.get()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.peer_tx.send(ChannelEvent::Closed);
        }
    }
}

/// Create a connected pair of in-process channels.
///
/// Each side's event stream starts with [`ChannelEvent::Open`].
pub fn pair() -> ((MemoryChannel, ChannelEvents), (MemoryChannel, ChannelEvents)) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(true));

    let a_to_b = DeliveryGauge::default();
    let b_to_a = DeliveryGauge::default();

    let _ = a_tx.send(ChannelEvent::Open);
    let _ = b_tx.send(ChannelEvent::Open);

    let a = MemoryChannel {
        peer_tx: b_tx,
        pending: a_to_b.clone(),
        open: Arc::clone(&open),
    };
    let b = MemoryChannel {
        peer_tx: a_tx,
        pending: b_to_a.clone(),
        open,
    };

    (
        (a, ChannelEvents::with_gauge(a_rx, b_to_a)),
        (b, ChannelEvents::with_gauge(b_rx, a_to_b)),
    )
}
