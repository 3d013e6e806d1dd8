//! CAPR Controller
//!
//! Single binary running the node provisioning control loops:
//! - Plan delivery server: hands agents their plan secret and a kubeconfig
//! - Node identity reconciler: copies node addresses and provider IDs onto
//!   infrastructure machines once the node registers
//! - CA tracking: keeps the `cacerts` setting in sync with the CA secret

mod backoff;
mod ca;
mod config;
mod controller;
mod error;
mod reconciler;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and reqwest both pull in rustls; pick ring explicitly
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting CAPR Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Server URL: {}", config.server_url);
    info!("  Listen address: {}", config.listen_addr());
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Plan wait timeout: {:?}", config.plan_wait_timeout);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
