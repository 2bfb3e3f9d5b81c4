//! RPC correlator: outstanding request bookkeeping.
//!
//! Message ids are caller-chosen, so the pending table is keyed by
//! `(caller, id)`: one caller's id space never collides with another's.
//! Resolution removes the entry, which is what makes exactly-once
//! structural: a reply, fault, timeout sweep, or disconnect cancellation
//! can each win the race, but only one of them finds the entry.
//!
//! Deadlines are evaluated on the dispatch loop's periodic sweep rather
//! than with per-call timers, so timer overhead does not grow with call
//! volume.

use crate::domain::Timestamp;
use gridbus_types::Identity;
use std::collections::HashMap;

/// Pending-table key: ids are only unique per caller.
type CallKey = (Identity, String);

/// One outstanding RPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    /// Identity awaiting the reply.
    pub caller: Identity,
    /// Identity expected to produce it.
    pub callee: Identity,
    /// Wall-clock deadline after which the caller gets a timeout fault.
    pub deadline: Timestamp,
    /// When the call was forwarded.
    pub issued_at: Timestamp,
}

/// Result of attempting to resolve a message id against the pending table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Entry found and removed; forward the result to this call's caller.
    Resolved(PendingCall),
    /// No such entry: the call already timed out, was cancelled, or never
    /// existed. The late result is dropped with a diagnostic.
    NotFound,
    /// Entry exists but the resolving identity is not the recorded callee.
    /// The entry stays; the imposter gets an error.
    WrongCallee { expected: Identity },
}

/// Calls cancelled when a peer disconnects, split by the departing
/// identity's role.
#[derive(Debug, Default)]
pub struct CancelledCalls {
    /// The peer was the callee: each caller gets a peer-gone fault.
    pub as_callee: Vec<(String, PendingCall)>,
    /// The peer was the caller: nobody is left to notify.
    pub as_caller: Vec<(String, PendingCall)>,
}

/// Tracks pending calls keyed by `(caller, message id)`.
#[derive(Debug, Default)]
pub struct RpcCorrelator {
    pending: HashMap<CallKey, PendingCall>,
}

impl RpcCorrelator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when no calls are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record an outstanding call. Returns `false` if this caller already
    /// has the id pending (the frame is rejected rather than clobbering the
    /// entry). Other callers' ids do not conflict.
    pub fn register(
        &mut self,
        caller: Identity,
        id: String,
        callee: Identity,
        now: Timestamp,
        deadline: Timestamp,
    ) -> bool {
        let key = (caller.clone(), id);
        if self.pending.contains_key(&key) {
            return false;
        }
        self.pending.insert(
            key,
            PendingCall {
                caller,
                callee,
                deadline,
                issued_at: now,
            },
        );
        true
    }

    /// Resolve `caller`'s pending `id` on behalf of `resolver` (the identity
    /// that sent the reply or fault). Removing the entry is the exactly-once
    /// point.
    pub fn resolve(&mut self, caller: &Identity, id: &str, resolver: &Identity) -> ResolveOutcome {
        let key = (caller.clone(), id.to_string());
        match self.pending.get(&key) {
            None => ResolveOutcome::NotFound,
            Some(call) if call.callee != *resolver => ResolveOutcome::WrongCallee {
                expected: call.callee.clone(),
            },
            Some(_) => match self.pending.remove(&key) {
                Some(call) => ResolveOutcome::Resolved(call),
                None => ResolveOutcome::NotFound,
            },
        }
    }

    /// Remove and return every call whose deadline has passed.
    pub fn sweep_expired(&mut self, now: Timestamp) -> Vec<(String, PendingCall)> {
        let expired: Vec<CallKey> = self
            .pending
            .iter()
            .filter(|(_, call)| now >= call.deadline)
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|call| (key.1, call)))
            .collect()
    }

    /// Remove and return every outstanding call. Shutdown path: each caller
    /// gets a peer-gone fault before its connection closes.
    pub fn drain(&mut self) -> Vec<(String, PendingCall)> {
        self.pending
            .drain()
            .map(|(key, call)| (key.1, call))
            .collect()
    }

    /// Cancel every call involving a departing identity.
    pub fn cancel_for_peer(&mut self, identity: &Identity) -> CancelledCalls {
        let involved: Vec<CallKey> = self
            .pending
            .iter()
            .filter(|(_, call)| call.caller == *identity || call.callee == *identity)
            .map(|(key, _)| key.clone())
            .collect();

        let mut cancelled = CancelledCalls::default();
        for key in involved {
            if let Some(call) = self.pending.remove(&key) {
                if call.callee == *identity {
                    cancelled.as_callee.push((key.1, call));
                } else {
                    cancelled.as_caller.push((key.1, call));
                }
            }
        }
        cancelled
    }
}
