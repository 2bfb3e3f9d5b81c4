//! Framed TCP transport.
//!
//! Each accepted socket gets two tasks: a reader that pumps decoded
//! messages into the router's event channel, and a writer that drains the
//! connection's bounded outbound queue. The queue is the back-pressure
//! point the router sees through the sink: `try_send` fails fast for
//! pubsub fan-out, `send` waits and lets the router's send timeout decide
//! when the peer counts as stalled.

use crate::codec::{read_message, write_message, CodecError};
use async_trait::async_trait;
use gridbus_router::ports::{FrameSink, SinkError};
use gridbus_router::RouterHandle;
use gridbus_types::wire::{envelope_from_frames, envelope_to_frames};
use gridbus_types::{ConnectionId, Envelope};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug)]
enum WriterCommand {
    Frames(Vec<Vec<u8>>),
    Close,
}

/// Outbound half of one TCP connection, handed to the router.
#[derive(Debug)]
struct TcpFrameSink {
    commands: mpsc::Sender<WriterCommand>,
    closed: AtomicBool,
}

impl TcpFrameSink {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSink for TcpFrameSink {
    async fn send(&self, frames: Vec<Vec<u8>>) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        self.commands
            .send(WriterCommand::Frames(frames))
            .await
            .map_err(|_| SinkError::Closed)
    }

    fn try_send(&self, frames: Vec<Vec<u8>>) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        self.commands
            .try_send(WriterCommand::Frames(frames))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => SinkError::Full,
                mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
            })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // Best effort: the writer also exits when the channel closes.
            let _ = self.commands.try_send(WriterCommand::Close);
        }
    }
}

/// Listening socket feeding accepted connections to the router.
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    handle: RouterHandle,
    outbound_capacity: usize,
}

impl TcpTransport {
    /// Bind the listening socket.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        handle: RouterHandle,
        outbound_capacity: usize,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "TCP transport listening");
        Ok(Self {
            listener,
            handle,
            outbound_capacity,
        })
    }

    /// The bound address, useful when binding port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "TCP connection accepted");
                    let handle = self.handle.clone();
                    let capacity = self.outbound_capacity;
                    tokio::spawn(async move {
                        run_connection(stream, handle, capacity).await;
                    });
                }
                Err(err) => {
                    // Transient accept failures (fd exhaustion) should not
                    // kill the listener.
                    warn!(error = %err, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn run_connection(stream: TcpStream, handle: RouterHandle, capacity: usize) {
    let connection = ConnectionId::generate();
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%connection, error = %err, "Failed to set TCP_NODELAY");
    }
    let (mut read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::channel(capacity);
    let sink = Arc::new(TcpFrameSink {
        commands: tx,
        closed: AtomicBool::new(false),
    });
    if handle.accepted(connection, sink.clone()).await.is_err() {
        return;
    }
    let writer = tokio::spawn(write_loop(write_half, rx));

    read_loop(&mut read_half, connection, &handle, &sink).await;

    sink.close();
    let _ = handle.disconnected(connection).await;
    // The writer exits once every sender is gone; the router drops its
    // clone while processing the disconnect.
    drop(sink);
    let _ = writer.await;
    debug!(%connection, "TCP connection closed");
}

async fn read_loop(
    read_half: &mut OwnedReadHalf,
    connection: ConnectionId,
    handle: &RouterHandle,
    sink: &TcpFrameSink,
) {
    loop {
        if sink.is_closed() {
            return;
        }
        match read_message(read_half).await {
            Ok(Some(frames)) => {
                if handle.frames(connection, frames).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(CodecError::Io(err)) => {
                debug!(%connection, error = %err, "TCP read failed");
                return;
            }
            Err(err) => {
                // Framing violations are unrecoverable on a byte stream:
                // the message boundary is lost.
                warn!(%connection, error = %err, "Closing connection on framing violation");
                return;
            }
        }
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Frames(frames) => {
                if let Err(err) = write_message(&mut write_half, &frames).await {
                    debug!(error = %err, "TCP write failed");
                    break;
                }
            }
            WriterCommand::Close => break,
        }
    }
    use tokio::io::AsyncWriteExt;
    let _ = write_half.shutdown().await;
}

/// Client side of the framed TCP protocol, for agents and tests.
#[derive(Debug)]
pub struct TcpClient {
    stream: TcpStream,
}

impl TcpClient {
    /// Connect to a router's TCP transport.
    pub async fn connect(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Send one envelope.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), CodecError> {
        write_message(&mut self.stream, &envelope_to_frames(envelope)).await
    }

    /// Receive the next envelope; `None` when the router closed the
    /// connection.
    pub async fn recv(&mut self) -> Result<Option<Envelope>, CodecError> {
        match read_message(&mut self.stream).await? {
            Some(frames) => Ok(Some(envelope_from_frames(frames)?)),
            None => Ok(None),
        }
    }
}
