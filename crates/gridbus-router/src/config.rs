//! Router configuration.

use serde::{Deserialize, Serialize};

/// Tunable parameters for one router instance.
///
/// All durations are milliseconds so the config can round-trip through TOML
/// without a custom duration syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Interval within which every connection must show life (any inbound
    /// frame counts). Two missed intervals mark the connection dead.
    pub heartbeat_interval_ms: u64,

    /// How often the dispatch loop sweeps for expired RPC deadlines and
    /// dead connections.
    pub sweep_interval_ms: u64,

    /// Platform-wide deadline applied to every pending RPC call. Callers
    /// wanting shorter deadlines enforce them locally; the router guarantees
    /// a timeout fault no later than this.
    pub rpc_timeout_ms: u64,

    /// How long a point-to-point delivery may wait for space in the
    /// recipient's outbound queue before the recipient is declared stalled
    /// and torn down.
    pub send_timeout_ms: u64,

    /// Capacity of the inbound event channel feeding the dispatch loop.
    pub event_queue_capacity: usize,

    /// Capacity of each connection's outbound frame queue.
    pub outbound_queue_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            sweep_interval_ms: 1_000,
            rpc_timeout_ms: 30_000,
            send_timeout_ms: 5_000,
            event_queue_capacity: 1_024,
            outbound_queue_capacity: 256,
        }
    }
}

impl RouterConfig {
    /// Short intervals for deterministic tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            heartbeat_interval_ms: 100,
            sweep_interval_ms: 20,
            rpc_timeout_ms: 200,
            send_timeout_ms: 100,
            event_queue_capacity: 64,
            outbound_queue_capacity: 8,
        }
    }

    /// Liveness deadline: two missed heartbeat intervals.
    #[must_use]
    pub const fn liveness_deadline_ms(&self) -> u64 {
        self.heartbeat_interval_ms * 2
    }
}
