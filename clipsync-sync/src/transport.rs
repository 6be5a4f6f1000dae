//! Relay transport seam.
//!
//! The sync client owns its transport exclusively, so the trait takes
//! `&mut self` and needs no internal locking. A network-backed
//! implementation lives with the application; [`ChannelTransport`] is the
//! in-process implementation used by tests and local relays.

use crate::protocol::{ClientFrame, RelayFrame};
use crate::{SyncError, SyncResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A bidirectional, session-authenticated channel to the relay.
#[async_trait]
pub trait RelayTransport: Send + Sync + 'static {
    /// Establishes (or re-establishes) the connection. Errors map to
    /// [`SyncError::NetworkUnavailable`] or [`SyncError::AuthExpired`].
    async fn connect(&mut self) -> SyncResult<()>;

    /// Sends one frame. Fails when the link is down.
    async fn send(&mut self, frame: ClientFrame) -> SyncResult<()>;

    /// Waits for the next inbound frame. `None` means the relay closed
    /// the connection. Cancel-safe.
    async fn recv(&mut self) -> Option<RelayFrame>;
}

/// In-process transport over tokio channels.
///
/// `pair()` yields the client half and a [`ChannelRelay`] the other side
/// (a test, or a loopback relay) drives. The shared online flag lets
/// tests sever the link to exercise reconnect behavior.
pub struct ChannelTransport {
    outbound_tx: mpsc::Sender<ClientFrame>,
    inbound_rx: mpsc::Receiver<RelayFrame>,
    online: Arc<AtomicBool>,
}

/// The relay-side half of a [`ChannelTransport`].
pub struct ChannelRelay {
    outbound_rx: mpsc::Receiver<ClientFrame>,
    inbound_tx: mpsc::Sender<RelayFrame>,
    online: Arc<AtomicBool>,
}

impl ChannelTransport {
    pub fn pair() -> (ChannelTransport, ChannelRelay) {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let online = Arc::new(AtomicBool::new(true));
        (
            ChannelTransport {
                outbound_tx,
                inbound_rx,
                online: online.clone(),
            },
            ChannelRelay {
                outbound_rx,
                inbound_tx,
                online,
            },
        )
    }
}

#[async_trait]
impl RelayTransport for ChannelTransport {
    async fn connect(&mut self) -> SyncResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::NetworkUnavailable("link is offline".to_string()))
        }
    }

    async fn send(&mut self, frame: ClientFrame) -> SyncResult<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(SyncError::NetworkUnavailable("link is offline".to_string()));
        }
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| SyncError::NetworkUnavailable("relay is gone".to_string()))
    }

    async fn recv(&mut self) -> Option<RelayFrame> {
        self.inbound_rx.recv().await
    }
}

impl ChannelRelay {
    /// Next frame sent by the client, `None` once the client is dropped.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.outbound_rx.recv().await
    }

    /// Pushes a frame toward the client.
    pub async fn send(&self, frame: RelayFrame) -> SyncResult<()> {
        self.inbound_tx
            .send(frame)
            .await
            .map_err(|_| SyncError::NetworkUnavailable("client is gone".to_string()))
    }

    /// Flips the simulated link state. While offline, `connect` and
    /// `send` on the client half fail.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}
