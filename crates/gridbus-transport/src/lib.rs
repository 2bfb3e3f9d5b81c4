//! # GridBus Transport Adapters
//!
//! Bridges between raw byte streams and the router's event channel. Each
//! adapter does the same three jobs:
//!
//! 1. build a [`FrameSink`](gridbus_router::ports::FrameSink) wrapping a
//!    bounded per-connection outbound queue,
//! 2. announce the connection to the router,
//! 3. pump inbound messages into
//!    [`RouterHandle::frames`](gridbus_router::RouterHandle) until the
//!    connection drops, then report the disconnect.
//!
//! Two adapters are provided: [`tcp`] for agents on other hosts (the
//! on-wire message layout lives in [`codec`]) and [`local`] for agents
//! running inside the router process, which skip the byte layer entirely
//! and exchange decoded frame lists over channels.
//!
//! [`testing`] builds a scripted agent on top of the local adapter for
//! integration suites.

pub mod codec;
pub mod local;
pub mod tcp;
pub mod testing;

pub use codec::{CodecError, MAX_MESSAGE_LEN};
pub use local::LocalConnection;
pub use tcp::{TcpClient, TcpTransport};
pub use testing::TestAgent;
