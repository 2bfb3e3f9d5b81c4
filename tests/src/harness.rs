//! Shared scenario fixture: a running router plus a small building-site
//! credential population.
//!
//! The cast:
//! - `drv1` (`k-drv`): device driver; publishes telemetry, answers RPC.
//! - `hist1` (`k-hist`): historian; capabilities come from the
//!   `historians` group.
//! - `ui1` (`k-ui`): web console; subscribe-only.
//! - `ctl1` (`k-ctl`): controller; issues RPC calls and control topics.
//! - `evil1` (`k-evil`): valid credential, zero capabilities.

use gridbus_router::ports::SystemTimeSource;
use gridbus_router::{CredentialStore, Router, RouterConfig, RouterHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const CRED_DRIVER: &str = "k-drv";
pub const CRED_HISTORIAN: &str = "k-hist";
pub const CRED_CONSOLE: &str = "k-ui";
pub const CRED_CONTROLLER: &str = "k-ctl";
pub const CRED_NO_CAPS: &str = "k-evil";

/// Generous wait for deliveries that must arrive.
pub const DELIVERY_WAIT: Duration = Duration::from_millis(500);

/// Short wait used to assert that nothing arrives.
pub const SILENCE_WAIT: Duration = Duration::from_millis(100);

/// The credential file every scenario starts from.
pub const CREDENTIALS_JSON: &str = r#"{
    "credentials": {
        "k-drv": {
            "identity": "drv1",
            "capabilities": ["publish:devices/#", "subscribe:control/#"]
        },
        "k-hist": {
            "identity": "hist1",
            "groups": ["historians"]
        },
        "k-ui": {
            "identity": "ui1",
            "capabilities": ["subscribe:devices/#"]
        },
        "k-ctl": {
            "identity": "ctl1",
            "capabilities": ["call:set_point", "call:query", "publish:control/#"]
        },
        "k-evil": {
            "identity": "evil1"
        }
    },
    "groups": {
        "historians": ["subscribe:devices/#", "call:query", "publish:archive/#"]
    }
}"#;

/// Parse the standard credential population.
pub fn credential_store() -> CredentialStore {
    CredentialStore::parse(CREDENTIALS_JSON).expect("harness credential file is valid")
}

/// Spawn a router with test timings and the standard credential set.
pub fn start_router() -> (RouterHandle, JoinHandle<()>) {
    start_router_with(credential_store())
}

/// Spawn a router with test timings and a custom credential set.
pub fn start_router_with(store: CredentialStore) -> (RouterHandle, JoinHandle<()>) {
    let (router, handle) = Router::new(
        RouterConfig::for_testing(),
        store,
        Arc::new(SystemTimeSource),
    );
    let task = tokio::spawn(router.run());
    (handle, task)
}

/// Test timings used by the scenarios for sleeping past deadlines.
pub fn timings() -> RouterConfig {
    RouterConfig::for_testing()
}
