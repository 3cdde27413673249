//! Bare-metal validation controller
//!
//! Watches metal3 BareMetalHosts enrolled for validation, images them through
//! the compute API, runs the validation task over SSH (per host, then per
//! cluster group) and records the outcome as host labels, events and NetBox
//! status before releasing the host.

mod backoff;
mod config;
mod controller;
mod election;
mod error;
mod events;
mod firmware;
mod firmware_queue;
mod metrics;
mod reconciler;
mod server;
mod state;
mod store;
mod task_meta;
#[cfg(test)]
mod test_utils;
mod transitions;
mod validator;
mod watcher;

use anyhow::anyhow;
use config::OperatorConfig;
use controller::Controller;
use std::env;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting bare-metal validation controller");

    let args: Vec<String> = env::args().collect();
    let config_path = OperatorConfig::path_from_args(&args);
    let config = OperatorConfig::load(&config_path).await?;

    info!("Configuration:");
    info!("  Config file: {}", config_path.display());
    info!("  Cloud account: {}", config.cloud_account_id);
    info!("  Enabled instance types: {}", config.enabled_instance_types.join(","));
    info!("  Group validation: {}", config.feature_flags.group_validation);
    info!("  Firmware upgrade: {}", config.feature_flags.enable_firmware_upgrade);
    info!("  Compute API: {}", config.compute_api_server_addr);
    info!("  NetBox URL: {}", config.netbox.url);
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
