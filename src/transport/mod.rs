//! Transport seam between the engine and the authenticated byte channel.
//!
//! The identity layer hands the engine an ordered, framed duplex channel
//! per peer; the engine only needs a send half ([`FrameSink`]) and a way
//! for the host's receive loop to push inbound deliveries into the
//! multiplexer. The in-memory link below backs the tests and doubles as a
//! loopback transport; the TCP adapter in [`tcp`] backs the demo binaries.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{AppError, Result};

pub mod tcp;

/// Send half of the per-peer frame channel.
///
/// One call sends one logical frame; ordering is the transport's problem.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one framed byte string to the peer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` when the channel is closed or the
    /// underlying write fails.
    async fn send(&self, data: Bytes) -> Result<()>;
}

/// [`FrameSink`] writing into a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&self, data: Bytes) -> Result<()> {
        self.tx
            .send(data)
            .await
            .map_err(|_| AppError::Transport("peer channel closed".into()))
    }
}

/// One end of an in-memory duplex frame link.
#[derive(Debug)]
pub struct MemoryEndpoint {
    /// Send half, handed to the session.
    pub sink: ChannelSink,
    /// Receive half, drained by the host's dispatch loop.
    pub inbound: mpsc::Receiver<Bytes>,
}

/// Create a connected pair of in-memory endpoints.
///
/// Frames sent on one endpoint's sink arrive on the other endpoint's
/// inbound receiver, in order.
#[must_use]
pub fn memory_link(capacity: usize) -> (MemoryEndpoint, MemoryEndpoint) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (
        MemoryEndpoint {
            sink: ChannelSink { tx: a_tx },
            inbound: a_rx,
        },
        MemoryEndpoint {
            sink: ChannelSink { tx: b_tx },
            inbound: b_rx,
        },
    )
}
