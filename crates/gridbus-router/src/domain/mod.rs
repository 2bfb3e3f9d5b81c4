//! Pure routing logic: no I/O, no clocks, no channels.
//!
//! Everything in here is exercised by the dispatch loop in
//! [`crate::service`] and tested deterministically with explicit
//! [`Timestamp`] values.

pub mod auth;
pub mod correlator;
pub mod credentials;
pub mod routing_table;
pub mod subscriptions;

pub use auth::{Admission, AdmissionError, AuthGate, Operation};
pub use correlator::{CancelledCalls, PendingCall, ResolveOutcome, RpcCorrelator};
pub use credentials::{CredentialEntry, CredentialStore, CredentialStoreError};
pub use routing_table::{RegistrationError, RouteEntry, RoutingTable};
pub use subscriptions::{pattern_matches, PatternError, SubscriptionTree};

/// Milliseconds since the Unix epoch.
///
/// Injected through [`crate::ports::TimeSource`] so deadline logic is
/// testable with fixed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Wrap a millisecond count.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// The raw millisecond count.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// This timestamp advanced by `ms` milliseconds.
    #[must_use]
    pub const fn add_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    /// Milliseconds elapsed since `earlier` (zero if `earlier` is later).
    #[must_use]
    pub const fn millis_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}
