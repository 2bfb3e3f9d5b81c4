//! # GridBus Test Suite
//!
//! Unified test crate for cross-crate scenarios: everything here runs a
//! real router task and talks to it through the transports, exactly as
//! platform agents would.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs        # Router fixture + credential set shared by scenarios
//! └── integration/      # Cross-crate choreography
//!     ├── pubsub_flows.rs     # Fan-out, capabilities, hot reload, back-pressure
//!     ├── rpc_flows.rs        # Correlation, faults, timeouts
//!     └── lifecycle_flows.rs  # Handshake, disconnect cascades, liveness, TCP
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All scenarios
//! cargo test -p gridbus-tests
//!
//! # By area
//! cargo test -p gridbus-tests pubsub
//! cargo test -p gridbus-tests rpc
//! cargo test -p gridbus-tests lifecycle
//! ```

#![allow(dead_code)]

pub mod harness;
pub mod integration;
