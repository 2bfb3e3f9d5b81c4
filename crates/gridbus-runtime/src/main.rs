//! `gridbusd`, the GridBus platform daemon.
//!
//! Usage: `gridbusd [config-path]`. Without an argument, `gridbusd.toml`
//! is used when present, built-in defaults otherwise.

use anyhow::Context;
use gridbus_runtime::{RuntimeConfig, DEFAULT_CONFIG_PATH};
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RuntimeConfig::load(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => RuntimeConfig::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("loading configuration from {DEFAULT_CONFIG_PATH}"))?,
        None => {
            info!("No configuration file found; using built-in defaults");
            RuntimeConfig::default()
        }
    };

    gridbus_runtime::run(config)
        .await
        .context("platform runtime failed")
}
