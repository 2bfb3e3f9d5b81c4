//! The router dispatch loop.
//!
//! One task owns every piece of mutable routing state: the auth gate's
//! credential snapshot, the routing table, the subscription tree, the RPC
//! correlator, and the connection registry. Transports feed it
//! [`RouterEvent`]s through a bounded channel and implement
//! [`FrameSink`](crate::ports::FrameSink) for the outbound half; nothing
//! else ever touches the state, so dispatch needs no locks and per-sender
//! FIFO falls out of run-to-completion handling.
//!
//! Delivery policy differs by traffic class. Pubsub fan-out uses `try_send`
//! and drops for the one subscriber whose queue is full; point-to-point
//! traffic waits for queue space up to the configured send timeout, after
//! which the stalled recipient is torn down as a transport loss.

use crate::config::RouterConfig;
use crate::domain::{
    AuthGate, CredentialStore, Operation, RegistrationError, ResolveOutcome, RoutingTable,
    RpcCorrelator, SubscriptionTree,
};
use crate::ports::{SharedSink, TimeSource};
use crate::ROUTER_IDENTITY;
use gridbus_types::wire::{envelope_from_frames, envelope_to_frames};
use gridbus_types::{ConnectionId, Credential, Envelope, ErrorCode, FaultKind, Identity, Subsystem};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// ============================================================
// Events and handle
// ============================================================

/// Everything that can happen to the router, funneled through one channel.
#[derive(Debug)]
pub enum RouterEvent {
    /// A transport accepted a new connection and built its outbound sink.
    Accepted {
        connection: ConnectionId,
        sink: SharedSink,
    },
    /// A complete multipart message arrived from a connection.
    Frames {
        connection: ConnectionId,
        frames: Vec<Vec<u8>>,
    },
    /// The transport observed the connection drop.
    Disconnected { connection: ConnectionId },
    /// Periodic sweep trigger for RPC deadlines and liveness.
    Tick,
    /// Swap in a freshly loaded credential snapshot.
    ReloadCredentials { store: CredentialStore },
    /// Stop the dispatch loop after cancelling outstanding calls.
    Shutdown,
}

/// The dispatch loop has stopped; no further events can be delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("router event loop has stopped")]
pub struct RouterStopped;

/// Cloneable sender half used by transports and the runtime.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    events: mpsc::Sender<RouterEvent>,
}

impl RouterHandle {
    /// Queue an event, waiting for channel space.
    pub async fn send(&self, event: RouterEvent) -> Result<(), RouterStopped> {
        self.events.send(event).await.map_err(|_| RouterStopped)
    }

    /// Announce a newly accepted connection.
    pub async fn accepted(
        &self,
        connection: ConnectionId,
        sink: SharedSink,
    ) -> Result<(), RouterStopped> {
        self.send(RouterEvent::Accepted { connection, sink }).await
    }

    /// Deliver one inbound multipart message.
    pub async fn frames(
        &self,
        connection: ConnectionId,
        frames: Vec<Vec<u8>>,
    ) -> Result<(), RouterStopped> {
        self.send(RouterEvent::Frames { connection, frames }).await
    }

    /// Report a dropped connection.
    pub async fn disconnected(&self, connection: ConnectionId) -> Result<(), RouterStopped> {
        self.send(RouterEvent::Disconnected { connection }).await
    }

    /// Hot-swap the credential snapshot.
    pub async fn reload_credentials(&self, store: CredentialStore) -> Result<(), RouterStopped> {
        self.send(RouterEvent::ReloadCredentials { store }).await
    }

    /// Request a graceful stop.
    pub async fn shutdown(&self) -> Result<(), RouterStopped> {
        self.send(RouterEvent::Shutdown).await
    }
}

// ============================================================
// Router state
// ============================================================

/// Authenticated binding of a connection.
#[derive(Debug, Clone)]
struct Session {
    identity: Identity,
    credential: Credential,
}

/// Per-connection state held by the dispatch task.
#[derive(Debug)]
struct ConnectionState {
    sink: SharedSink,
    session: Option<Session>,
}

/// Counters exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub connections: usize,
    pub identities: usize,
    pub subscriptions: usize,
    pub pending_calls: usize,
}

/// The interconnect core: owns all routing state, consumes [`RouterEvent`]s.
#[derive(Debug)]
pub struct Router {
    config: RouterConfig,
    gate: AuthGate,
    table: RoutingTable,
    subscriptions: SubscriptionTree,
    correlator: RpcCorrelator,
    connections: HashMap<ConnectionId, ConnectionState>,
    time: Arc<dyn TimeSource>,
    events: mpsc::Receiver<RouterEvent>,
    identity: Identity,
    /// Set when internal state is observed inconsistent; the loop stops
    /// rather than keep routing on corrupt state.
    poisoned: bool,
}

impl Router {
    /// Build a router and the handle transports feed it through.
    #[must_use]
    pub fn new(
        config: RouterConfig,
        store: CredentialStore,
        time: Arc<dyn TimeSource>,
    ) -> (Self, RouterHandle) {
        let (tx, rx) = mpsc::channel(config.event_queue_capacity);
        let identity =
            Identity::new(ROUTER_IDENTITY).expect("reserved router identity is a valid token");
        let router = Self {
            table: RoutingTable::new(config.liveness_deadline_ms()),
            config,
            gate: AuthGate::new(store),
            subscriptions: SubscriptionTree::new(),
            correlator: RpcCorrelator::new(),
            connections: HashMap::new(),
            time,
            events: rx,
            identity,
            poisoned: false,
        };
        (router, RouterHandle { events: tx })
    }

    /// Current state counters.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            connections: self.connections.len(),
            identities: self.table.len(),
            subscriptions: self.subscriptions.len(),
            pending_calls: self.correlator.len(),
        }
    }

    /// Drive the dispatch loop until shutdown or handle drop.
    pub async fn run(mut self) {
        let mut sweep =
            tokio::time::interval(Duration::from_millis(self.config.sweep_interval_ms));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            heartbeat_interval_ms = self.config.heartbeat_interval_ms,
            rpc_timeout_ms = self.config.rpc_timeout_ms,
            "Router dispatch loop started"
        );
        loop {
            let keep_going = tokio::select! {
                _ = sweep.tick() => self.handle_event(RouterEvent::Tick).await,
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => false,
                },
            };
            if !keep_going {
                break;
            }
        }
        info!("Router dispatch loop stopped");
    }

    /// Process one event to completion. Returns `false` when the loop
    /// should stop. Public so tests can drive the router deterministically.
    pub async fn handle_event(&mut self, event: RouterEvent) -> bool {
        match event {
            RouterEvent::Accepted { connection, sink } => {
                debug!(%connection, "Connection accepted");
                self.connections
                    .insert(connection, ConnectionState { sink, session: None });
            }
            RouterEvent::Frames { connection, frames } => {
                self.handle_frames(connection, frames).await;
            }
            RouterEvent::Disconnected { connection } => {
                self.teardown(connection, "transport disconnect");
            }
            RouterEvent::Tick => self.sweep(),
            RouterEvent::ReloadCredentials { store } => {
                info!(credentials = store.len(), "Credential snapshot replaced");
                self.gate.replace_store(store);
            }
            RouterEvent::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        !self.poisoned
    }

    // ============================================================
    // Frame dispatch
    // ============================================================

    async fn handle_frames(&mut self, connection: ConnectionId, frames: Vec<Vec<u8>>) {
        let envelope = match envelope_from_frames(frames) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.reject_malformed(connection, &err.to_string());
                return;
            }
        };

        let Some(state) = self.connections.get(&connection) else {
            debug!(%connection, "Frames from unknown connection dropped");
            return;
        };

        match state.session.clone() {
            None => self.dispatch_unauthenticated(connection, envelope),
            Some(session) => self.dispatch(connection, session, envelope).await,
        }
    }

    /// Malformed traffic: answered with `error` post-auth, fatal pre-auth.
    fn reject_malformed(&mut self, connection: ConnectionId, reason: &str) {
        let Some(state) = self.connections.get(&connection) else {
            return;
        };
        if state.session.is_some() {
            warn!(%connection, reason, "Malformed frames from authenticated connection");
            let reply = self
                .error_envelope(None, "", ErrorCode::Malformed, reason);
            self.push_to_connection(connection, &reply);
        } else {
            warn!(%connection, reason, "Malformed frames during handshake; closing");
            self.teardown(connection, "malformed pre-auth frames");
        }
    }

    fn dispatch_unauthenticated(&mut self, connection: ConnectionId, envelope: Envelope) {
        // Before welcome, hello is the only subsystem a connection may
        // speak. Everything else is dropped without a reply.
        if !envelope.subsystem.allowed_before_auth() {
            debug!(
                %connection,
                subsystem = %envelope.subsystem,
                "Dropping pre-auth frame"
            );
            return;
        }
        if envelope.subsystem == Subsystem::Hello {
            self.handle_hello(connection, envelope);
        }
    }

    async fn dispatch(&mut self, connection: ConnectionId, session: Session, envelope: Envelope) {
        // Sender authority: the sender frame must equal the authenticated
        // identity. Mismatches are rejected, never rewritten.
        if envelope.sender != session.identity {
            warn!(
                %connection,
                identity = %session.identity,
                claimed = %envelope.sender,
                "Rejecting spoofed sender"
            );
            let reply = self.error_envelope(
                Some(session.identity.clone()),
                &envelope.id,
                ErrorCode::Malformed,
                "sender does not match authenticated identity",
            );
            self.push_to_connection(connection, &reply);
            return;
        }

        // Any accepted frame is proof of life.
        let now = self.time.now();
        self.table.touch(&session.identity, now);

        match envelope.subsystem {
            Subsystem::Hello => {
                let reply = self.error_envelope(
                    Some(session.identity.clone()),
                    &envelope.id,
                    ErrorCode::Malformed,
                    "already authenticated",
                );
                self.push_to_connection(connection, &reply);
            }
            Subsystem::Ping => self.handle_ping(connection, session, envelope).await,
            Subsystem::Pong => {
                if let Some(recipient) = envelope.recipient.clone() {
                    self.forward(envelope, &recipient).await;
                }
                // A bare pong is just the liveness refresh above.
            }
            Subsystem::Subscribe | Subsystem::Unsubscribe => {
                self.handle_subscription(connection, session, envelope);
            }
            Subsystem::Publish => self.handle_publish(connection, session, envelope),
            Subsystem::RpcCall => self.handle_rpc_call(connection, session, envelope).await,
            Subsystem::RpcReply | Subsystem::RpcFault => {
                self.handle_rpc_result(connection, session, envelope).await;
            }
            Subsystem::Welcome | Subsystem::Error => {
                debug!(
                    identity = %session.identity,
                    subsystem = %envelope.subsystem,
                    "Dropping router-reserved subsystem from agent"
                );
            }
        }
    }

    // ============================================================
    // Handshake
    // ============================================================

    fn handle_hello(&mut self, connection: ConnectionId, envelope: Envelope) {
        let Some(token) = envelope.arg_str(0).filter(|t| !t.is_empty()) else {
            self.refuse_admission(
                connection,
                &envelope.id,
                ErrorCode::Malformed,
                "hello requires a credential argument",
            );
            return;
        };
        let Ok(credential) = Credential::new(token) else {
            self.refuse_admission(
                connection,
                &envelope.id,
                ErrorCode::Malformed,
                "credential token failed validation",
            );
            return;
        };
        let proposed = envelope.arg_str(1).filter(|t| !t.is_empty());

        let now = self.time.now();
        let live_binding = self
            .table
            .identity_for_credential(&credential)
            .filter(|identity| self.table.is_live(identity, now))
            .cloned();

        let admission =
            match self
                .gate
                .authenticate(&credential, proposed, live_binding.as_ref())
            {
                Ok(admission) => admission,
                Err(err) => {
                    info!(
                        %connection,
                        credential = %credential,
                        error = %err,
                        "Admission refused"
                    );
                    self.refuse_admission(connection, &envelope.id, err.code(), &err.to_string());
                    return;
                }
            };

        let evicted = match self.table.register(
            admission.identity.clone(),
            connection,
            credential.clone(),
            now,
        ) {
            Ok(evicted) => evicted,
            Err(RegistrationError::IdentityInUse { identity }) => {
                info!(%connection, %identity, "Admission refused: identity in use");
                self.refuse_admission(
                    connection,
                    &envelope.id,
                    ErrorCode::IdentityConflict,
                    &format!("identity {identity} is in use by a live connection"),
                );
                return;
            }
        };

        // Replacing a dead predecessor: the new session starts clean, so the
        // predecessor's subscriptions and pending calls are cancelled now.
        if let Some(old_connection) = evicted {
            if let Some(old) = self.connections.remove(&old_connection) {
                old.sink.close();
            }
            let dropped = self.subscriptions.remove_identity(&admission.identity);
            self.cancel_calls_for(&admission.identity, "peer replaced after missed heartbeats");
            info!(
                identity = %admission.identity,
                connection = %old_connection,
                subscriptions = dropped,
                "Dead session replaced by reconnecting agent"
            );
        }

        let Some(state) = self.connections.get_mut(&connection) else {
            self.poison("registered identity for a connection that no longer exists");
            return;
        };
        state.session = Some(Session {
            identity: admission.identity.clone(),
            credential,
        });

        info!(%connection, identity = %admission.identity, "Agent authenticated");
        let mut args = vec![admission.identity.as_str().as_bytes().to_vec()];
        args.extend(admission.capabilities.iter().map(|c| c.as_bytes().to_vec()));
        let welcome = Envelope::to_peer(
            self.identity.clone(),
            admission.identity,
            Subsystem::Welcome,
        )
        .with_id(envelope.id)
        .with_args(args);
        self.push_to_connection(connection, &welcome);
    }

    /// Send a handshake `error` frame and tear the connection down. No
    /// router state exists for it yet, so refusal leaves nothing behind.
    fn refuse_admission(
        &mut self,
        connection: ConnectionId,
        reply_to: &str,
        code: ErrorCode,
        reason: &str,
    ) {
        let reply = self.error_envelope(None, reply_to, code, reason);
        self.push_to_connection(connection, &reply);
        self.teardown(connection, "admission refused");
    }

    // ============================================================
    // Presence
    // ============================================================

    async fn handle_ping(&mut self, connection: ConnectionId, session: Session, envelope: Envelope) {
        match envelope.recipient.clone() {
            // Addressed to the router: answer directly.
            None => {
                let pong = Envelope::to_peer(
                    self.identity.clone(),
                    session.identity,
                    Subsystem::Pong,
                )
                .with_id(envelope.id);
                self.push_to_connection(connection, &pong);
            }
            // Peer-to-peer probe: forwarded like any point-to-point frame.
            Some(recipient) => {
                if self.table.lookup(&recipient).is_none() {
                    let reply = self.error_envelope(
                        Some(session.identity),
                        &envelope.id,
                        ErrorCode::Malformed,
                        &format!("recipient {recipient} is not connected"),
                    );
                    self.push_to_connection(connection, &reply);
                    return;
                }
                self.forward(envelope, &recipient).await;
            }
        }
    }

    // ============================================================
    // Pubsub
    // ============================================================

    fn handle_subscription(
        &mut self,
        connection: ConnectionId,
        session: Session,
        envelope: Envelope,
    ) {
        let Some(pattern) = envelope.arg_str(0).map(str::to_owned) else {
            let reply = self.error_envelope(
                Some(session.identity),
                &envelope.id,
                ErrorCode::Malformed,
                "subscription verbs require a pattern argument",
            );
            self.push_to_connection(connection, &reply);
            return;
        };

        // Both verbs are gated by the subscribe capability: a peer that may
        // not subscribe to a pattern has no business unsubscribing it either.
        let op = Operation::Subscribe(&pattern);
        if !self.gate.authorize(&session.credential, &op) {
            self.push_capability_denied(connection, &session.identity, &envelope.id, &op);
            return;
        }

        let result = if envelope.subsystem == Subsystem::Subscribe {
            self.subscriptions.subscribe(session.identity.clone(), &pattern)
        } else {
            self.subscriptions.unsubscribe(&session.identity, &pattern)
        };
        match result {
            Ok(changed) => {
                debug!(
                    identity = %session.identity,
                    pattern = %pattern,
                    subsystem = %envelope.subsystem,
                    changed,
                    "Subscription updated"
                );
            }
            Err(err) => {
                let reply = self.error_envelope(
                    Some(session.identity),
                    &envelope.id,
                    ErrorCode::Malformed,
                    &err.to_string(),
                );
                self.push_to_connection(connection, &reply);
            }
        }
    }

    fn handle_publish(&mut self, connection: ConnectionId, session: Session, envelope: Envelope) {
        let Some(topic) = envelope.arg_str(0).map(str::to_owned) else {
            let reply = self.error_envelope(
                Some(session.identity),
                &envelope.id,
                ErrorCode::Malformed,
                "publish requires a topic argument",
            );
            self.push_to_connection(connection, &reply);
            return;
        };

        let op = Operation::Publish(&topic);
        if !self.gate.authorize(&session.credential, &op) {
            self.push_capability_denied(connection, &session.identity, &envelope.id, &op);
            return;
        }

        // Point-in-time fan-out: the match set is computed once; later
        // subscription changes do not affect this delivery.
        let matched = self.subscriptions.collect(&topic);
        let mut delivered = 0usize;
        for subscriber in &matched {
            let Some(entry) = self.table.lookup(subscriber) else {
                continue;
            };
            let Some(state) = self.connections.get(&entry.connection) else {
                continue;
            };
            let delivery = Envelope {
                sender: session.identity.clone(),
                recipient: Some(subscriber.clone()),
                user: envelope.user.clone(),
                id: envelope.id.clone(),
                subsystem: Subsystem::Publish,
                args: envelope.args.clone(),
            };
            match state.sink.try_send(envelope_to_frames(&delivery)) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    // Slow subscribers lose this message; the rest of the
                    // fan-out proceeds.
                    warn!(
                        subscriber = %subscriber,
                        topic = %topic,
                        error = %err,
                        "Dropping publish delivery"
                    );
                }
            }
        }
        debug!(
            publisher = %session.identity,
            topic = %topic,
            matched = matched.len(),
            delivered,
            "Publish fanned out"
        );
    }

    // ============================================================
    // RPC
    // ============================================================

    async fn handle_rpc_call(
        &mut self,
        connection: ConnectionId,
        session: Session,
        envelope: Envelope,
    ) {
        if envelope.id.is_empty() {
            let reply = self.error_envelope(
                Some(session.identity),
                "",
                ErrorCode::Malformed,
                "rpc.call requires a message id",
            );
            self.push_to_connection(connection, &reply);
            return;
        }
        let Some(callee) = envelope.recipient.clone() else {
            let reply = self.error_envelope(
                Some(session.identity),
                &envelope.id,
                ErrorCode::Malformed,
                "rpc.call requires a recipient",
            );
            self.push_to_connection(connection, &reply);
            return;
        };
        let Some(method) = envelope.arg_str(0).map(str::to_owned) else {
            let reply = self.error_envelope(
                Some(session.identity),
                &envelope.id,
                ErrorCode::Malformed,
                "rpc.call requires a method argument",
            );
            self.push_to_connection(connection, &reply);
            return;
        };

        let op = Operation::Call(&method);
        if !self.gate.authorize(&session.credential, &op) {
            self.push_fault(
                &session.identity,
                &envelope.id,
                FaultKind::CapabilityDenied,
                &format!("operation {} requires a matching capability", op.describe()),
            );
            return;
        }

        if self.table.lookup(&callee).is_none() {
            self.push_fault(
                &session.identity,
                &envelope.id,
                FaultKind::Unreachable,
                &format!("recipient {callee} is not connected"),
            );
            return;
        }

        let now = self.time.now();
        let deadline = now.add_millis(self.config.rpc_timeout_ms);
        if !self.correlator.register(
            session.identity.clone(),
            envelope.id.clone(),
            callee.clone(),
            now,
            deadline,
        ) {
            let reply = self.error_envelope(
                Some(session.identity),
                &envelope.id,
                ErrorCode::Malformed,
                "message id is already pending",
            );
            self.push_to_connection(connection, &reply);
            return;
        }

        // Registered before forwarding: if delivery fails and the callee is
        // torn down, cancellation faults the caller with peer-gone.
        self.forward(envelope, &callee).await;
    }

    async fn handle_rpc_result(
        &mut self,
        connection: ConnectionId,
        session: Session,
        envelope: Envelope,
    ) {
        // Results address the caller, whose pending table holds the id.
        let Some(caller) = envelope.recipient.clone() else {
            let reply = self.error_envelope(
                Some(session.identity),
                &envelope.id,
                ErrorCode::Malformed,
                "rpc results require a recipient",
            );
            self.push_to_connection(connection, &reply);
            return;
        };

        match self.correlator.resolve(&caller, &envelope.id, &session.identity) {
            ResolveOutcome::Resolved(call) => {
                debug!(
                    id = %envelope.id,
                    caller = %call.caller,
                    callee = %call.callee,
                    subsystem = %envelope.subsystem,
                    "RPC call resolved"
                );
                self.forward(envelope, &call.caller).await;
            }
            ResolveOutcome::NotFound => {
                // Late result after timeout, cancellation, or a bogus id.
                debug!(
                    id = %envelope.id,
                    sender = %session.identity,
                    "Dropping RPC result with no pending call"
                );
            }
            ResolveOutcome::WrongCallee { expected } => {
                warn!(
                    id = %envelope.id,
                    sender = %session.identity,
                    expected = %expected,
                    "RPC result from identity that is not the callee"
                );
                let reply = self.error_envelope(
                    Some(session.identity),
                    &envelope.id,
                    ErrorCode::Malformed,
                    "message id belongs to another callee",
                );
                self.push_to_connection(connection, &reply);
            }
        }
    }

    // ============================================================
    // Sweeps, teardown, shutdown
    // ============================================================

    /// Periodic deadline and liveness sweep.
    fn sweep(&mut self) {
        let now = self.time.now();

        for (id, call) in self.correlator.sweep_expired(now) {
            info!(
                id = %id,
                caller = %call.caller,
                callee = %call.callee,
                "RPC call timed out"
            );
            self.push_fault(
                &call.caller,
                &id,
                FaultKind::Timeout,
                "no reply within the platform deadline",
            );
        }

        for (identity, connection) in self.table.sweep_dead(now) {
            warn!(%identity, %connection, "Evicting silent connection");
            if let Some(state) = self.connections.remove(&connection) {
                state.sink.close();
            }
            self.subscriptions.remove_identity(&identity);
            self.cancel_calls_for(&identity, "peer missed its liveness deadline");
        }
    }

    /// Remove a connection and cascade-clean the state tied to its identity.
    fn teardown(&mut self, connection: ConnectionId, reason: &str) {
        let Some(state) = self.connections.remove(&connection) else {
            return;
        };
        state.sink.close();
        let Some(session) = state.session else {
            debug!(%connection, reason, "Unauthenticated connection closed");
            return;
        };

        // The identity may already belong to a replacement connection; only
        // the binding's current owner cascades.
        let owns_binding = self
            .table
            .lookup(&session.identity)
            .is_some_and(|entry| entry.connection == connection);
        if !owns_binding {
            debug!(%connection, identity = %session.identity, reason, "Superseded connection closed");
            return;
        }

        self.table.unregister(&session.identity);
        let dropped = self.subscriptions.remove_identity(&session.identity);
        self.cancel_calls_for(&session.identity, "peer disconnected");
        info!(
            %connection,
            identity = %session.identity,
            subscriptions = dropped,
            reason,
            "Connection torn down"
        );
    }

    /// Cancel every pending call involving `identity`; callers still waiting
    /// on it get peer-gone faults, its own outstanding requests are dropped.
    fn cancel_calls_for(&mut self, identity: &Identity, detail: &str) {
        let cancelled = self.correlator.cancel_for_peer(identity);
        for (id, call) in cancelled.as_callee {
            self.push_fault(&call.caller, &id, FaultKind::PeerGone, detail);
        }
        for (id, call) in cancelled.as_caller {
            debug!(id = %id, caller = %call.caller, "Dropping pending call from departed caller");
        }
    }

    fn shutdown(&mut self) {
        let stats = self.stats();
        info!(
            connections = stats.connections,
            pending_calls = stats.pending_calls,
            "Router shutting down"
        );
        for (id, call) in self.correlator.drain() {
            self.push_fault(&call.caller, &id, FaultKind::PeerGone, "router shutting down");
        }
        for (_, state) in self.connections.drain() {
            state.sink.close();
        }
    }

    /// Internal invariants do not hold; stop routing rather than corrupt
    /// delivery guarantees.
    fn poison(&mut self, detail: &str) {
        error!(detail, "Internal inconsistency; stopping router");
        self.poisoned = true;
    }

    // ============================================================
    // Outbound helpers
    // ============================================================

    /// Point-to-point delivery: wait for queue space up to the send timeout,
    /// then declare the recipient stalled and tear it down.
    async fn forward(&mut self, envelope: Envelope, to: &Identity) -> bool {
        let Some(entry) = self.table.lookup(to) else {
            debug!(recipient = %to, "Recipient vanished before forwarding");
            return false;
        };
        let connection = entry.connection;
        let Some(state) = self.connections.get(&connection) else {
            self.poison("routing table references an unknown connection");
            return false;
        };
        let sink = state.sink.clone();
        let frames = envelope_to_frames(&envelope);

        let deadline = Duration::from_millis(self.config.send_timeout_ms);
        match tokio::time::timeout(deadline, sink.send(frames)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(recipient = %to, error = %err, "Point-to-point delivery failed");
                self.teardown(connection, "outbound send failed");
                false
            }
            Err(_) => {
                warn!(recipient = %to, "Recipient stalled past the send timeout");
                self.teardown(connection, "outbound queue stalled");
                false
            }
        }
    }

    /// Queue a router-synthesized frame on a specific connection without
    /// waiting. Router frames are small and queues start empty at handshake;
    /// a full queue here only loses a diagnostic the peer was not draining.
    fn push_to_connection(&self, connection: ConnectionId, envelope: &Envelope) {
        let Some(state) = self.connections.get(&connection) else {
            return;
        };
        if let Err(err) = state.sink.try_send(envelope_to_frames(envelope)) {
            debug!(%connection, error = %err, subsystem = %envelope.subsystem, "Router frame dropped");
        }
    }

    /// Queue a router-synthesized RPC fault for a caller identity.
    fn push_fault(&mut self, caller: &Identity, id: &str, kind: FaultKind, detail: &str) {
        let Some(entry) = self.table.lookup(caller) else {
            debug!(caller = %caller, id, "Fault recipient no longer connected");
            return;
        };
        let fault = Envelope::to_peer(self.identity.clone(), caller.clone(), Subsystem::RpcFault)
            .with_id(id)
            .with_args(vec![
                kind.as_str().as_bytes().to_vec(),
                detail.as_bytes().to_vec(),
            ]);
        self.push_to_connection(entry.connection, &fault);
    }

    fn push_capability_denied(
        &mut self,
        connection: ConnectionId,
        identity: &Identity,
        id: &str,
        op: &Operation<'_>,
    ) {
        info!(identity = %identity, operation = %op.describe(), "Operation denied");
        let reply = Envelope::to_peer(self.identity.clone(), identity.clone(), Subsystem::Error)
            .with_id(id)
            .with_args(vec![
                FaultKind::CapabilityDenied.as_str().as_bytes().to_vec(),
                format!("operation {} requires a matching capability", op.describe()).into_bytes(),
            ]);
        self.push_to_connection(connection, &reply);
    }

    fn error_envelope(
        &self,
        recipient: Option<Identity>,
        reply_to: &str,
        code: ErrorCode,
        reason: &str,
    ) -> Envelope {
        Envelope {
            sender: self.identity.clone(),
            recipient,
            user: String::new(),
            id: reply_to.to_string(),
            subsystem: Subsystem::Error,
            args: vec![
                code.as_str().as_bytes().to_vec(),
                reason.as_bytes().to_vec(),
            ],
        }
    }
}

// ============================================================
// Tests
// ============================================================
