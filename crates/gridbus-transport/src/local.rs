//! In-process transport.
//!
//! Agents living in the router's own process skip the byte layer: decoded
//! frame lists move over channels, but the connection goes through exactly
//! the same admission and dispatch path as a socket would. This is the
//! transport the integration suite and embedded platform agents use.

use async_trait::async_trait;
use gridbus_router::ports::{FrameSink, SinkError};
use gridbus_router::{RouterHandle, RouterStopped};
use gridbus_types::wire::{envelope_from_frames, envelope_to_frames};
use gridbus_types::{ConnectionId, Envelope};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Outbound half of an in-process connection.
///
/// The sender lives behind a mutex so `close` can take it out; dropping it
/// is what makes the agent's receive side observe the closure.
#[derive(Debug)]
struct LocalFrameSink {
    tx: Mutex<Option<mpsc::Sender<Vec<Vec<u8>>>>>,
}

impl LocalFrameSink {
    fn sender(&self) -> Option<mpsc::Sender<Vec<Vec<u8>>>> {
        self.tx.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl FrameSink for LocalFrameSink {
    async fn send(&self, frames: Vec<Vec<u8>>) -> Result<(), SinkError> {
        let Some(tx) = self.sender() else {
            return Err(SinkError::Closed);
        };
        tx.send(frames).await.map_err(|_| SinkError::Closed)
    }

    fn try_send(&self, frames: Vec<Vec<u8>>) -> Result<(), SinkError> {
        let Some(tx) = self.sender() else {
            return Err(SinkError::Closed);
        };
        tx.try_send(frames).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn close(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }
}

/// One in-process agent connection.
///
/// Send with [`LocalConnection::send`]; receive router deliveries with
/// [`LocalConnection::recv`]. Dropping the connection without calling
/// [`LocalConnection::disconnect`] leaves eviction to the liveness sweep,
/// exactly like a silently dying socket peer.
#[derive(Debug)]
pub struct LocalConnection {
    connection: ConnectionId,
    handle: RouterHandle,
    inbound: mpsc::Receiver<Vec<Vec<u8>>>,
}

impl LocalConnection {
    /// Open a connection with a bounded delivery queue and announce it to
    /// the router.
    pub async fn connect(
        handle: &RouterHandle,
        queue_capacity: usize,
    ) -> Result<Self, RouterStopped> {
        let connection = ConnectionId::generate();
        let (tx, inbound) = mpsc::channel(queue_capacity);
        let sink = Arc::new(LocalFrameSink {
            tx: Mutex::new(Some(tx)),
        });
        handle.accepted(connection, sink).await?;
        Ok(Self {
            connection,
            handle: handle.clone(),
            inbound,
        })
    }

    /// The transport-level id of this connection.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// Submit one envelope to the router.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), RouterStopped> {
        self.handle
            .frames(self.connection, envelope_to_frames(envelope))
            .await
    }

    /// Next envelope delivered to this connection; `None` once the router
    /// has closed it.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let frames = self.inbound.recv().await?;
            match envelope_from_frames(frames) {
                Ok(envelope) => return Some(envelope),
                Err(err) => {
                    // Router-encoded frames should always decode.
                    warn!(connection = %self.connection, error = %err, "Dropping undecodable delivery");
                }
            }
        }
    }

    /// [`LocalConnection::recv`] bounded by a timeout; `None` on timeout or
    /// closure.
    pub async fn recv_within(&mut self, timeout: Duration) -> Option<Envelope> {
        tokio::time::timeout(timeout, self.recv()).await.ok()?
    }

    /// Announce a clean disconnect, freeing the identity immediately.
    pub async fn disconnect(self) -> Result<(), RouterStopped> {
        self.handle.disconnected(self.connection).await
    }
}
