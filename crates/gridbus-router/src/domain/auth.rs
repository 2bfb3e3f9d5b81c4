//! Auth gate: connection admission and the single per-operation
//! authorization check.
//!
//! Admission happens once per connection (the `hello` handshake). Operation
//! authorization happens on **every** capability-sensitive dispatch
//! (publish, subscribe, RPC call) against the current credential-store
//! snapshot, so a capability revoked mid-session takes effect on the
//! subscriber's next operation rather than at its next reconnect.

use crate::domain::credentials::CredentialStore;
use crate::domain::subscriptions::pattern_matches;
use crate::RESERVED_IDENTITY_PREFIX;
use gridbus_types::{Credential, ErrorCode, Identity};
use std::collections::BTreeSet;
use tracing::debug;

/// Why a connection was refused admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// Presented credential is not in the store.
    #[error("unknown credential")]
    UnknownCredential,
    /// This credential already has a live session under another identity.
    #[error("credential already bound to live identity {bound_to}")]
    CredentialInUse { bound_to: Identity },
    /// Proposed identity is reserved for the platform.
    #[error("identity {identity} uses the reserved platform prefix")]
    ReservedIdentity { identity: Identity },
    /// Proposed identity token failed validation.
    #[error("malformed identity token")]
    MalformedIdentity,
}

impl AdmissionError {
    /// Wire reason code carried by the handshake `error` frame.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownCredential => ErrorCode::UnknownCredential,
            Self::CredentialInUse { .. } | Self::ReservedIdentity { .. } => {
                ErrorCode::IdentityConflict
            }
            Self::MalformedIdentity => ErrorCode::Malformed,
        }
    }
}

/// Successful admission: the verified identity and its capability set at
/// handshake time (informational; checks are re-evaluated per operation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub identity: Identity,
    pub capabilities: BTreeSet<String>,
}

/// A capability-gated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation<'a> {
    /// Publish to a topic.
    Publish(&'a str),
    /// Subscribe to a topic pattern.
    Subscribe(&'a str),
    /// Call an RPC method on a peer.
    Call(&'a str),
}

impl Operation<'_> {
    /// Capability verb this operation requires.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Publish(_) => "publish",
            Self::Subscribe(_) => "subscribe",
            Self::Call(_) => "call",
        }
    }

    /// The topic, pattern, or method name being acted on.
    #[must_use]
    pub const fn object(&self) -> &str {
        match self {
            Self::Publish(o) | Self::Subscribe(o) | Self::Call(o) => o,
        }
    }

    /// Human-readable form for fault details and logs.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}:{}", self.verb(), self.object())
    }
}

/// The security gate every other component depends on.
///
/// Holds the current credential-store snapshot; [`AuthGate::replace_store`]
/// is the hot-reload entry point.
#[derive(Debug, Default)]
pub struct AuthGate {
    store: CredentialStore,
}

impl AuthGate {
    /// Create a gate over a loaded store.
    #[must_use]
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    /// Swap in a freshly loaded snapshot. Live sessions keep their
    /// identities; their next operation is checked against the new snapshot.
    pub fn replace_store(&mut self, store: CredentialStore) {
        self.store = store;
    }

    /// The current snapshot.
    #[must_use]
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Validate a handshake.
    ///
    /// `proposed` is the identity the agent asked for (empty hello frame →
    /// `None`, which falls back to the credential's stored identity).
    /// `live_identity` is the identity this credential is currently bound
    /// to, if it already has a live session.
    ///
    /// Identity-vs-identity conflicts (someone else already connected under
    /// the proposed name) are enforced by routing-table registration, which
    /// also handles dead-session replacement; this gate owns the
    /// credential-side checks.
    pub fn authenticate(
        &self,
        credential: &Credential,
        proposed: Option<&str>,
        live_identity: Option<&Identity>,
    ) -> Result<Admission, AdmissionError> {
        let entry = self
            .store
            .lookup(credential)
            .ok_or(AdmissionError::UnknownCredential)?;

        let identity = match proposed {
            None => entry.identity.clone(),
            Some(token) => {
                Identity::new(token).map_err(|_| AdmissionError::MalformedIdentity)?
            }
        };

        if identity.as_str().starts_with(RESERVED_IDENTITY_PREFIX) {
            return Err(AdmissionError::ReservedIdentity { identity });
        }

        if let Some(bound) = live_identity {
            if *bound != identity {
                return Err(AdmissionError::CredentialInUse {
                    bound_to: bound.clone(),
                });
            }
        }

        let capabilities = self
            .store
            .capabilities_for(credential)
            .unwrap_or_default();

        Ok(Admission {
            identity,
            capabilities,
        })
    }

    /// The single authorization check invoked before every
    /// capability-sensitive dispatch branch.
    ///
    /// A capability `verb:pattern` grants `op` when the verbs match and the
    /// pattern matches the operation's object with the same hierarchical
    /// prefix semantics as topic subscriptions.
    #[must_use]
    pub fn authorize(&self, credential: &Credential, op: &Operation<'_>) -> bool {
        let Some(caps) = self.store.capabilities_for(credential) else {
            // Credential removed since admission: deny on next operation.
            debug!(operation = %op.describe(), "Authorization denied: credential no longer known");
            return false;
        };

        let allowed = caps.iter().any(|cap| {
            cap.split_once(':').is_some_and(|(verb, pattern)| {
                verb == op.verb()
                    && (pattern == op.object() || pattern_matches(pattern, op.object()))
            })
        });
        if !allowed {
            debug!(operation = %op.describe(), "Authorization denied: no matching capability");
        }
        allowed
    }
}
