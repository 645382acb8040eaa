//! Length-delimited TCP frame link for the demo binaries.
//!
//! Each logical frame travels as one length-prefixed chunk; the peer's DID
//! is exchanged as the first frame in each direction so the demo can route
//! without a full identity handshake. Real deployments replace this module
//! with their authenticated channel and keep the [`FrameSink`] seam.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mux::SessionMultiplexer;
use crate::transport::FrameSink;
use crate::{AppError, Result};

/// Send half of a TCP frame link.
pub struct TcpSink {
    writer: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
}

#[async_trait]
impl FrameSink for TcpSink {
    async fn send(&self, data: Bytes) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .send(data)
            .await
            .map_err(|err| AppError::Transport(format!("tcp send failed: {err}")))
    }
}

/// Receive half of a TCP frame link.
pub struct TcpSource {
    reader: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
}

impl TcpSource {
    /// Next inbound frame, `None` on a cleanly closed connection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` on read failures.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        match self.reader.next().await {
            Some(Ok(frame)) => Ok(Some(frame.freeze())),
            Some(Err(err)) => Err(AppError::Transport(format!("tcp recv failed: {err}"))),
            None => Ok(None),
        }
    }
}

/// A connected frame link with the peer's DID already exchanged.
pub struct TcpFrameLink {
    /// Peer identity received in the hello frame.
    pub peer_did: String,
    /// Send half.
    pub sink: Arc<TcpSink>,
    /// Receive half.
    pub source: TcpSource,
}

fn split_link(stream: TcpStream) -> (Arc<TcpSink>, TcpSource) {
    let (read_half, write_half) = stream.into_split();
    let sink = Arc::new(TcpSink {
        writer: Mutex::new(FramedWrite::new(write_half, LengthDelimitedCodec::new())),
    });
    let source = TcpSource {
        reader: FramedRead::new(read_half, LengthDelimitedCodec::new()),
    };
    (sink, source)
}

async fn exchange_hello(
    sink: &TcpSink,
    source: &mut TcpSource,
    local_did: &str,
) -> Result<String> {
    sink.send(Bytes::copy_from_slice(local_did.as_bytes()))
        .await?;
    let frame = source
        .next_frame()
        .await?
        .ok_or_else(|| AppError::Transport("connection closed before hello".into()))?;
    let peer_did = String::from_utf8(frame.to_vec())
        .map_err(|_| AppError::Transport("hello frame is not UTF-8".into()))?;
    if peer_did.is_empty() {
        return Err(AppError::Transport("peer sent an empty DID".into()));
    }
    Ok(peer_did)
}

/// Dial a peer and exchange DID hello frames.
///
/// # Errors
///
/// Returns `AppError::Transport` on connect or hello failures.
pub async fn connect(addr: impl ToSocketAddrs, local_did: &str) -> Result<TcpFrameLink> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|err| AppError::Transport(format!("connect failed: {err}")))?;
    let (sink, mut source) = split_link(stream);
    let peer_did = exchange_hello(&sink, &mut source, local_did).await?;
    info!(%peer_did, "tcp link established");
    Ok(TcpFrameLink {
        peer_did,
        sink,
        source,
    })
}

/// Accept one inbound connection and exchange DID hello frames.
///
/// # Errors
///
/// Returns `AppError::Transport` on accept or hello failures.
pub async fn accept_one(listener: &TcpListener, local_did: &str) -> Result<TcpFrameLink> {
    let (stream, remote) = listener
        .accept()
        .await
        .map_err(|err| AppError::Transport(format!("accept failed: {err}")))?;
    debug!(%remote, "inbound tcp connection");
    let (sink, mut source) = split_link(stream);
    let peer_did = exchange_hello(&sink, &mut source, local_did).await?;
    info!(%peer_did, "tcp link established");
    Ok(TcpFrameLink {
        peer_did,
        sink,
        source,
    })
}

/// Pump inbound frames from a TCP source into the multiplexer.
///
/// Runs until the connection closes, a fatal dispatch error occurs, or
/// `cancel` fires. Dispatch errors for individual frames are logged and do
/// not stop the pump.
pub async fn pump(
    mut source: TcpSource,
    mux: Arc<SessionMultiplexer>,
    peer_did: String,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => {
                debug!(%peer_did, "frame pump cancelled");
                break;
            }
            frame = source.next_frame() => frame,
        };

        match frame {
            Ok(Some(data)) => {
                if let Err(err) = mux.dispatch(&peer_did, &data).await {
                    warn!(%peer_did, %err, "inbound frame dropped");
                }
            }
            Ok(None) => {
                info!(%peer_did, "peer closed the connection");
                break;
            }
            Err(err) => {
                warn!(%peer_did, %err, "frame pump terminating");
                break;
            }
        }
    }
}
