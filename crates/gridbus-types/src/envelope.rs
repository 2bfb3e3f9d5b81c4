//! The message envelope routed by the interconnect.
//!
//! An [`Envelope`] is immutable once constructed: the router consults the
//! header fields it owns (sender, recipient, id, subsystem) and forwards the
//! argument frames untouched. Payload interpretation belongs entirely to the
//! agents on either end.

use crate::identity::Identity;
use std::fmt;
use std::str::FromStr;

/// Shorthand used by the tag enums below: `Display` delegates to `as_str`.
macro_rules! fmt_as_str {
    () => {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    };
}

/// Closed set of subsystem tags the router dispatches on.
///
/// Dispatch is a match over this enum, not an open-ended handler lookup:
/// a tag outside this set is a malformed frame, answered with `error`
/// (or dropped pre-auth), never routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// Handshake: propose an identity and present a credential.
    Hello,
    /// Handshake success: assigned identity plus capability set.
    Welcome,
    /// Router-originated fault frame for non-RPC failures.
    Error,
    /// Liveness probe.
    Ping,
    /// Liveness reply.
    Pong,
    /// Point-to-point RPC request.
    RpcCall,
    /// RPC success result, correlated by message id.
    RpcReply,
    /// RPC typed failure, correlated by message id.
    RpcFault,
    /// Add a topic-pattern subscription.
    Subscribe,
    /// Remove a topic-pattern subscription.
    Unsubscribe,
    /// Publish to a topic; also the tag of fan-out deliveries.
    Publish,
}

impl Subsystem {
    /// Wire token for this subsystem.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Welcome => "welcome",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::RpcCall => "rpc.call",
            Self::RpcReply => "rpc.reply",
            Self::RpcFault => "rpc.fault",
            Self::Subscribe => "pubsub.subscribe",
            Self::Unsubscribe => "pubsub.unsubscribe",
            Self::Publish => "pubsub.publish",
        }
    }

    /// True for the tags an unauthenticated connection may send.
    ///
    /// Before `welcome`, a connection may only speak `hello`; everything
    /// else, pings included, is dropped at the door.
    #[must_use]
    pub const fn allowed_before_auth(self) -> bool {
        matches!(self, Self::Hello)
    }
}

impl fmt::Display for Subsystem {
    fmt_as_str!();
}

impl FromStr for Subsystem {
    type Err = UnknownSubsystem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hello" => Ok(Self::Hello),
            "welcome" => Ok(Self::Welcome),
            "error" => Ok(Self::Error),
            "ping" => Ok(Self::Ping),
            "pong" => Ok(Self::Pong),
            "rpc.call" => Ok(Self::RpcCall),
            "rpc.reply" => Ok(Self::RpcReply),
            "rpc.fault" => Ok(Self::RpcFault),
            "pubsub.subscribe" => Ok(Self::Subscribe),
            "pubsub.unsubscribe" => Ok(Self::Unsubscribe),
            "pubsub.publish" => Ok(Self::Publish),
            other => Err(UnknownSubsystem(other.to_string())),
        }
    }
}

/// A subsystem tag outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown subsystem tag: {0:?}")]
pub struct UnknownSubsystem(pub String);

/// Typed failure kinds delivered to RPC callers, so they can branch on
/// failure cause instead of parsing strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Recipient identity is not connected.
    Unreachable,
    /// Deadline passed with no reply from the callee.
    Timeout,
    /// Callee raised an application-level error.
    Application,
    /// Sender lacks the capability for the attempted operation.
    CapabilityDenied,
    /// Peer disconnected while the call was outstanding.
    PeerGone,
}

impl FaultKind {
    /// Wire token for this fault kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::Application => "application",
            Self::CapabilityDenied => "capability-denied",
            Self::PeerGone => "peer-gone",
        }
    }

    /// Parse a wire token; unknown tokens map to `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unreachable" => Some(Self::Unreachable),
            "timeout" => Some(Self::Timeout),
            "application" => Some(Self::Application),
            "capability-denied" => Some(Self::CapabilityDenied),
            "peer-gone" => Some(Self::PeerGone),
            _ => None,
        }
    }
}

impl fmt::Display for FaultKind {
    fmt_as_str!();
}

/// Reason codes carried by handshake `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Presented credential is not in the store.
    UnknownCredential,
    /// Identity or credential already bound to a live session.
    IdentityConflict,
    /// Frame did not follow the protocol.
    Malformed,
}

impl ErrorCode {
    /// Wire token for this reason code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownCredential => "unknown-credential",
            Self::IdentityConflict => "identity-conflict",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fmt_as_str!();
}

/// The structured message unit routed by the core.
///
/// Field order mirrors the wire frame order:
/// `[sender, recipient, proto, user, id, subsystem, args..]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Authenticated identity of the originating connection. Must match the
    /// connection's identity or the frame is rejected.
    pub sender: Identity,
    /// Destination identity; `None` addresses the router itself (handshake,
    /// pubsub verbs, presence).
    pub recipient: Option<Identity>,
    /// Opaque user id, carried end-to-end without interpretation.
    pub user: String,
    /// Message id; for RPC traffic this is the correlation key.
    pub id: String,
    /// Dispatch tag.
    pub subsystem: Subsystem,
    /// Ordered, opaque payload frames.
    pub args: Vec<Vec<u8>>,
}

impl Envelope {
    /// Construct an envelope addressed to the router itself.
    #[must_use]
    pub fn to_router(sender: Identity, subsystem: Subsystem) -> Self {
        Self {
            sender,
            recipient: None,
            user: String::new(),
            id: String::new(),
            subsystem,
            args: Vec::new(),
        }
    }

    /// Construct a point-to-point envelope.
    #[must_use]
    pub fn to_peer(sender: Identity, recipient: Identity, subsystem: Subsystem) -> Self {
        Self {
            sender,
            recipient: Some(recipient),
            user: String::new(),
            id: String::new(),
            subsystem,
            args: Vec::new(),
        }
    }

    /// Builder-style message id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder-style argument frames.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Vec<u8>>) -> Self {
        self.args = args;
        self
    }

    /// Argument frame `i` interpreted as UTF-8, if present and valid.
    #[must_use]
    pub fn arg_str(&self, i: usize) -> Option<&str> {
        self.args.get(i).and_then(|f| std::str::from_utf8(f).ok())
    }
}
