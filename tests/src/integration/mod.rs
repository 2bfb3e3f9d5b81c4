//! Cross-crate choreography: real router task, real transports.

pub mod lifecycle_flows;
pub mod pubsub_flows;
pub mod rpc_flows;
