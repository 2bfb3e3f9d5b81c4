//! The seams between the routing core and the outside world.
//!
//! Transports implement [`FrameSink`] for their outbound half; the dispatch
//! loop never touches a socket directly. [`TimeSource`] injects the clock so
//! liveness and RPC deadlines are testable with a manual clock.

use crate::domain::Timestamp;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Why a sink refused a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Bounded outbound queue is full; the peer is not draining.
    #[error("outbound queue full")]
    Full,
    /// Connection already closed.
    #[error("connection closed")]
    Closed,
}

/// Outbound half of one agent connection.
///
/// Implementations wrap a bounded queue drained by the transport's writer
/// task, so a stalled peer exerts back-pressure here instead of inside the
/// dispatch loop.
#[async_trait]
pub trait FrameSink: Send + Sync + fmt::Debug {
    /// Queue a multipart message, waiting for queue space.
    ///
    /// The dispatch loop bounds the wait with its send timeout; a sink that
    /// stays full past it is treated as a lost connection.
    async fn send(&self, frames: Vec<Vec<u8>>) -> Result<(), SinkError>;

    /// Queue a multipart message without waiting. Used for pubsub fan-out,
    /// where one slow subscriber must not stall delivery to the rest.
    fn try_send(&self, frames: Vec<Vec<u8>>) -> Result<(), SinkError>;

    /// Close the connection. Idempotent.
    fn close(&self);
}

/// Injected clock.
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> Timestamp;
}

/// Production clock backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp::from_millis(ms)
    }
}

/// Convenience alias: sinks are shared between the dispatch loop and the
/// transport that created them.
pub type SharedSink = Arc<dyn FrameSink>;
