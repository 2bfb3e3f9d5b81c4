//! Routing table: identity → live transport connection, with heartbeat
//! liveness.
//!
//! Registration of an already-present identity replaces the prior mapping
//! only when the prior connection has provably missed its liveness
//! deadline; otherwise registration fails and the newcomer is refused.
//! Any inbound frame refreshes liveness, so only quiet agents need to send
//! explicit pings.

use crate::domain::Timestamp;
use gridbus_types::{ConnectionId, Credential, Identity};
use std::collections::HashMap;

/// Why a registration was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// The identity is bound to a connection that is still live.
    #[error("identity {identity} is in use by a live connection")]
    IdentityInUse { identity: Identity },
}

/// One live identity binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// The transport connection frames are forwarded to.
    pub connection: ConnectionId,
    /// Credential the identity authenticated with.
    pub credential: Credential,
    /// When the binding was created.
    pub registered_at: Timestamp,
    /// Last time any frame arrived from this connection.
    pub last_seen: Timestamp,
    /// Count of frames accepted from this connection, in receipt order.
    pub sequence: u64,
}

/// In-memory identity → connection mapping.
///
/// Owned exclusively by the dispatch task.
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: HashMap<Identity, RouteEntry>,
    /// Reverse index for credential-conflict checks at admission.
    by_credential: HashMap<Credential, Identity>,
    liveness_deadline_ms: u64,
}

impl RoutingTable {
    /// Create a table whose entries go dead after `liveness_deadline_ms`
    /// without traffic (normally two heartbeat intervals).
    #[must_use]
    pub fn new(liveness_deadline_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            by_credential: HashMap::new(),
            liveness_deadline_ms,
        }
    }

    /// Number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no identities are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Has an entry missed its liveness deadline?
    #[must_use]
    fn is_dead(&self, entry: &RouteEntry, now: Timestamp) -> bool {
        now.millis_since(entry.last_seen) >= self.liveness_deadline_ms
    }

    /// Bind `identity` to `connection`.
    ///
    /// Returns the connection id of a replaced **dead** predecessor, if
    /// any, so the caller can finish tearing it down. A live predecessor
    /// refuses the registration.
    pub fn register(
        &mut self,
        identity: Identity,
        connection: ConnectionId,
        credential: Credential,
        now: Timestamp,
    ) -> Result<Option<ConnectionId>, RegistrationError> {
        let evicted = match self.entries.get(&identity) {
            Some(prior) if !self.is_dead(prior, now) => {
                return Err(RegistrationError::IdentityInUse { identity });
            }
            Some(prior) => {
                let gone = prior.connection;
                self.by_credential.remove(&prior.credential);
                Some(gone)
            }
            None => None,
        };

        self.by_credential
            .insert(credential.clone(), identity.clone());
        self.entries.insert(
            identity,
            RouteEntry {
                connection,
                credential,
                registered_at: now,
                last_seen: now,
                sequence: 0,
            },
        );
        Ok(evicted)
    }

    /// Entry for an identity, if registered.
    #[must_use]
    pub fn lookup(&self, identity: &Identity) -> Option<&RouteEntry> {
        self.entries.get(identity)
    }

    /// Is this identity registered and within its liveness deadline?
    #[must_use]
    pub fn is_live(&self, identity: &Identity, now: Timestamp) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|entry| !self.is_dead(entry, now))
    }

    /// Identity currently bound to a credential, if any.
    #[must_use]
    pub fn identity_for_credential(&self, credential: &Credential) -> Option<&Identity> {
        self.by_credential.get(credential)
    }

    /// Remove a binding. Returns the removed entry so the caller can close
    /// the connection and cancel dependent state.
    ///
    /// The credential may already be re-bound to a newer identity (a dead
    /// session whose credential reconnected under another name before the
    /// sweep got here); the reverse index only drops entries this identity
    /// still owns.
    pub fn unregister(&mut self, identity: &Identity) -> Option<RouteEntry> {
        let entry = self.entries.remove(identity)?;
        if self
            .by_credential
            .get(&entry.credential)
            .is_some_and(|bound| bound == identity)
        {
            self.by_credential.remove(&entry.credential);
        }
        Some(entry)
    }

    /// Refresh liveness and advance the per-connection sequence counter.
    /// Returns the frame's sequence number, or `None` for an unknown
    /// identity.
    pub fn touch(&mut self, identity: &Identity, now: Timestamp) -> Option<u64> {
        let entry = self.entries.get_mut(identity)?;
        entry.last_seen = now;
        entry.sequence += 1;
        Some(entry.sequence)
    }

    /// Remove every entry past its liveness deadline, returning the evicted
    /// bindings for cascade cleanup.
    pub fn sweep_dead(&mut self, now: Timestamp) -> Vec<(Identity, ConnectionId)> {
        let dead: Vec<Identity> = self
            .entries
            .iter()
            .filter(|(_, e)| self.is_dead(e, now))
            .map(|(id, _)| id.clone())
            .collect();

        dead.into_iter()
            .filter_map(|identity| {
                let entry = self.unregister(&identity)?;
                Some((identity, entry.connection))
            })
            .collect()
    }

}
