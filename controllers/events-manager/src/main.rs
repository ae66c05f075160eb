//! Events Manager
//!
//! Receives the lifecycle events machines stream to the control plane, logs
//! them, and records the addresses each machine reports as annotations on its
//! `Server` object.

mod config;
mod controller;
mod error;
mod http;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use metal_store::KubeStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting Events Manager");

    // Load configuration from environment variables
    let config = Config::from_env()?;
    config.log();

    let store = KubeStore::try_default().await?;

    let controller = Controller::new(config, store).await?;
    controller.run(CancellationToken::new()).await
}
