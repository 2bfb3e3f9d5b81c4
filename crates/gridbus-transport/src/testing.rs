//! Scripted agent for integration suites.
//!
//! [`TestAgent`] wraps a [`LocalConnection`] with the handshake and the
//! verb vocabulary, so scenarios read as the conversation they exercise
//! instead of envelope plumbing.

use crate::local::LocalConnection;
use gridbus_router::{RouterHandle, RouterStopped};
use gridbus_types::{Envelope, FaultKind, Identity, IdentityError, Subsystem};
use std::time::Duration;

/// Default delivery-queue capacity for test agents. Small enough that a
/// back-pressure scenario can fill it quickly.
pub const TEST_QUEUE_CAPACITY: usize = 8;

/// How a scripted interaction failed.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The router's dispatch loop is gone.
    #[error(transparent)]
    Stopped(#[from] RouterStopped),
    /// Identity token failed validation before anything was sent.
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// The router refused admission.
    #[error("admission refused: {code} ({reason})")]
    Refused { code: String, reason: String },
    /// The connection closed while a reply was expected.
    #[error("connection closed")]
    Closed,
    /// The router answered with a frame the script did not expect.
    #[error("unexpected {0} frame")]
    Unexpected(String),
}

/// An authenticated in-process agent driving scripted traffic.
#[derive(Debug)]
pub struct TestAgent {
    conn: LocalConnection,
    identity: Identity,
    next_call: u64,
}

impl TestAgent {
    /// Connect, handshake, and return an authenticated agent.
    ///
    /// `proposed` of `None` takes the credential's stored identity.
    pub async fn connect(
        handle: &RouterHandle,
        credential: &str,
        proposed: Option<&str>,
    ) -> Result<Self, AgentError> {
        let mut conn = LocalConnection::connect(handle, TEST_QUEUE_CAPACITY).await?;

        // Pre-auth frames still need a syntactically valid sender.
        let sender = Identity::new(proposed.unwrap_or("handshake"))?;
        let mut args = vec![credential.as_bytes().to_vec()];
        if let Some(identity) = proposed {
            args.push(identity.as_bytes().to_vec());
        }
        let hello = Envelope::to_router(sender, Subsystem::Hello)
            .with_id("hello-1")
            .with_args(args);
        conn.send(&hello).await?;

        let reply = conn.recv().await.ok_or(AgentError::Closed)?;
        match reply.subsystem {
            Subsystem::Welcome => {
                let identity = Identity::new(reply.arg_str(0).unwrap_or_default())?;
                Ok(Self {
                    conn,
                    identity,
                    next_call: 0,
                })
            }
            Subsystem::Error => Err(AgentError::Refused {
                code: reply.arg_str(0).unwrap_or_default().to_string(),
                reason: reply.arg_str(1).unwrap_or_default().to_string(),
            }),
            other => Err(AgentError::Unexpected(other.to_string())),
        }
    }

    /// The identity the router assigned at handshake.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Send an arbitrary envelope under this agent's identity.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), AgentError> {
        self.conn.send(envelope).await?;
        Ok(())
    }

    pub async fn subscribe(&self, pattern: &str) -> Result<(), AgentError> {
        let env = Envelope::to_router(self.identity.clone(), Subsystem::Subscribe)
            .with_args(vec![pattern.as_bytes().to_vec()]);
        self.send(&env).await
    }

    pub async fn unsubscribe(&self, pattern: &str) -> Result<(), AgentError> {
        let env = Envelope::to_router(self.identity.clone(), Subsystem::Unsubscribe)
            .with_args(vec![pattern.as_bytes().to_vec()]);
        self.send(&env).await
    }

    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), AgentError> {
        let env = Envelope::to_router(self.identity.clone(), Subsystem::Publish)
            .with_args(vec![topic.as_bytes().to_vec(), payload.to_vec()]);
        self.send(&env).await
    }

    /// Issue an RPC call with a generated message id; returns the id so the
    /// scenario can correlate the outcome.
    pub async fn call(
        &mut self,
        callee: &Identity,
        method: &str,
        args: &[&[u8]],
    ) -> Result<String, AgentError> {
        self.next_call += 1;
        let id = format!("{}-{}", self.identity, self.next_call);
        let mut frames = vec![method.as_bytes().to_vec()];
        frames.extend(args.iter().map(|a| a.to_vec()));
        let env = Envelope::to_peer(self.identity.clone(), callee.clone(), Subsystem::RpcCall)
            .with_id(&id)
            .with_args(frames);
        self.send(&env).await?;
        Ok(id)
    }

    pub async fn reply(&self, caller: &Identity, id: &str, result: &[u8]) -> Result<(), AgentError> {
        let env = Envelope::to_peer(self.identity.clone(), caller.clone(), Subsystem::RpcReply)
            .with_id(id)
            .with_args(vec![result.to_vec()]);
        self.send(&env).await
    }

    pub async fn fault(
        &self,
        caller: &Identity,
        id: &str,
        kind: FaultKind,
        detail: &str,
    ) -> Result<(), AgentError> {
        let env = Envelope::to_peer(self.identity.clone(), caller.clone(), Subsystem::RpcFault)
            .with_id(id)
            .with_args(vec![
                kind.as_str().as_bytes().to_vec(),
                detail.as_bytes().to_vec(),
            ]);
        self.send(&env).await
    }

    pub async fn ping(&self) -> Result<(), AgentError> {
        let env = Envelope::to_router(self.identity.clone(), Subsystem::Ping);
        self.send(&env).await
    }

    /// Next delivery, or `None` when the router closed the connection.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.conn.recv().await
    }

    /// Next delivery within `timeout`; `None` on timeout or closure.
    pub async fn recv_within(&mut self, timeout: Duration) -> Option<Envelope> {
        self.conn.recv_within(timeout).await
    }

    /// Assert that nothing arrives within `timeout`.
    pub async fn expect_silence(&mut self, timeout: Duration) -> Result<(), AgentError> {
        match self.conn.recv_within(timeout).await {
            None => Ok(()),
            Some(envelope) => Err(AgentError::Unexpected(envelope.subsystem.to_string())),
        }
    }

    /// Disconnect cleanly, freeing the identity.
    pub async fn disconnect(self) -> Result<(), AgentError> {
        self.conn.disconnect().await?;
        Ok(())
    }
}
