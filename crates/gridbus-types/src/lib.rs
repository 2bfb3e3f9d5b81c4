//! # GridBus Shared Types
//!
//! The data model every GridBus crate agrees on:
//!
//! - [`Identity`], [`Credential`], [`ConnectionId`]: naming and admission
//!   tokens for connected agents.
//! - [`Envelope`] and the closed [`Subsystem`] tag set: the unit the router
//!   moves around. The router owns the header fields; payload frames are
//!   opaque bytes it never inspects or mutates.
//! - The wire codec in [`wire`]: the transport-agnostic multipart frame
//!   layout every transport adapter must be able to encode and decode.
//!
//! ## Envelope Authority
//!
//! The `sender` field of a routed envelope is the sole source of identity
//! truth and must equal the connection's authenticated identity. The router
//! rejects mismatches; it never silently rewrites them.

pub mod envelope;
pub mod identity;
pub mod wire;

pub use envelope::{Envelope, ErrorCode, FaultKind, Subsystem, UnknownSubsystem};
pub use identity::{ConnectionId, Credential, Identity, IdentityError};
pub use wire::{WireError, MAX_FRAMES, MAX_FRAME_LEN, PROTO_SIGNATURE};

/// Current wire protocol version tag, sent as the third frame of every
/// message. Receivers must check it before interpreting anything else.
pub const PROTOCOL_VERSION: &str = "GBP1";
