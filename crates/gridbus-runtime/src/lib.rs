//! # GridBus Runtime
//!
//! Everything `gridbusd` needs around the router core: the TOML
//! configuration file, credential-store loading, transport wiring, and
//! signal handling (SIGHUP hot-reloads the credential store, ctrl-c shuts
//! down gracefully).

use gridbus_router::domain::credentials::CredentialStoreError;
use gridbus_router::ports::SystemTimeSource;
use gridbus_router::{CredentialStore, Router, RouterConfig, RouterHandle};
use gridbus_transport::TcpTransport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Default location of the daemon config file.
pub const DEFAULT_CONFIG_PATH: &str = "gridbusd.toml";

/// Contents of `gridbusd.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Address the TCP transport listens on.
    pub bind_address: String,
    /// Path to the JSON credential store.
    pub credential_file: PathBuf,
    /// Router tunables, under a `[router]` table.
    pub router: RouterConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:22916".to_string(),
            credential_file: PathBuf::from("credentials.json"),
            router: RouterConfig::default(),
        }
    }
}

/// Errors produced while loading the daemon configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Config file was not valid TOML for the expected layout.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl RuntimeConfig {
    /// Load and parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = toml::from_str(&raw)?;
        info!(path = %path.as_ref().display(), "Configuration loaded");
        Ok(config)
    }
}

/// Why the daemon could not start or keep running.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Credentials(#[from] CredentialStoreError),
    #[error("failed to bind transport: {0}")]
    Bind(#[from] std::io::Error),
}

/// Run the platform until ctrl-c.
pub async fn run(config: RuntimeConfig) -> Result<(), RuntimeError> {
    let store = CredentialStore::load(&config.credential_file)?;
    let (router, handle) = Router::new(config.router.clone(), store, Arc::new(SystemTimeSource));

    let transport = TcpTransport::bind(
        config.bind_address.as_str(),
        handle.clone(),
        config.router.outbound_queue_capacity,
    )
    .await?;
    info!(
        bind = %config.bind_address,
        credential_file = %config.credential_file.display(),
        "GridBus platform starting"
    );

    let router_task = tokio::spawn(router.run());
    let transport_task = tokio::spawn(transport.serve());
    spawn_reload_task(handle.clone(), config.credential_file.clone());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(err) => warn!(error = %err, "Signal listener failed; shutting down"),
    }

    transport_task.abort();
    let _ = handle.shutdown().await;
    let _ = router_task.await;
    info!("GridBus platform stopped");
    Ok(())
}

/// SIGHUP reloads the credential store; a broken file keeps the previous
/// snapshot so a bad edit cannot lock every agent out.
#[cfg(unix)]
fn spawn_reload_task(handle: RouterHandle, credential_file: PathBuf) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(err) => {
                warn!(error = %err, "SIGHUP listener unavailable; hot reload disabled");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!(path = %credential_file.display(), "SIGHUP: reloading credential store");
            match CredentialStore::load(&credential_file) {
                Ok(store) => {
                    if handle.reload_credentials(store).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Credential reload failed; keeping previous snapshot");
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_task(_handle: RouterHandle, _credential_file: PathBuf) {}
