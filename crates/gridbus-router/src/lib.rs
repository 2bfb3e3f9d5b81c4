//! # GridBus Router
//!
//! The interconnect core of the GridBus platform. Agents connect through a
//! transport adapter, authenticate against the credential store, and from
//! then on every frame they send flows through one cooperative dispatch
//! loop that owns all routing state:
//!
//! ```text
//! ┌──────────┐  frames   ┌────────────────────────────────────────┐
//! │Transport │ ────────▶ │            Router (one task)           │
//! │ Adapter  │           │  ┌──────────┐ ┌───────────────┐        │
//! └──────────┘           │  │Auth Gate │ │ Routing Table │        │
//!      ▲                 │  └──────────┘ └───────────────┘        │
//!      │    fan-out /    │  ┌──────────────────┐ ┌─────────────┐  │
//!      └──────────────── │  │ Subscription Tree│ │RPC Correlator│ │
//!           forwards     │  └──────────────────┘ └─────────────┘  │
//!                        └────────────────────────────────────────┘
//! ```
//!
//! ## Layout
//!
//! - [`domain`]: pure routing logic: credential store, auth gate, routing
//!   table, subscription trie, RPC correlator. No I/O, deterministic tests.
//! - [`ports`]: the seams, [`ports::FrameSink`] (outbound, implemented by
//!   transports) and [`ports::TimeSource`] (injected clock).
//! - [`service`]: the [`service::Router`] dispatch loop tying it together.
//!
//! ## Guarantees
//!
//! - A routed envelope's sender always equals the connection's authenticated
//!   identity; spoofed senders are rejected, never rewritten.
//! - Frames from one sender are processed in receipt order; dispatch runs to
//!   completion per frame, so per-sender FIFO needs no extra machinery.
//! - Every pending RPC call resolves exactly once: reply, fault, timeout, or
//!   peer-gone cancellation on disconnect.

pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use config::RouterConfig;
pub use domain::credentials::CredentialStore;
pub use service::{Router, RouterEvent, RouterHandle, RouterStats, RouterStopped};

/// Identity the router itself signs synthesized frames with (welcomes,
/// faults, pongs). Agents may not claim names under the `gridbus.` prefix.
pub const ROUTER_IDENTITY: &str = "gridbus.router";

/// Prefix reserved for platform-internal identities.
pub const RESERVED_IDENTITY_PREFIX: &str = "gridbus.";
