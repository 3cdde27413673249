//! Main controller implementation.
//!
//! Builds the clients the reconciler needs and runs the background tasks:
//! the BareMetalHost watcher, the firmware ConfigMap watcher, the firmware
//! worker, the startup firmware sweep and the metrics server.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::events::KubeEventPublisher;
use crate::firmware_queue::{run_firmware_worker, FirmwareQueue};
use crate::metrics::Metrics;
use crate::reconciler::{Reconciler, Services};
use crate::server;
use crate::store::{HostStore, KubeHostStore};
use crate::validator::SshValidatorFactory;
use crate::watcher::{firmware_sweep, watch_firmware_maps, watch_hosts};
use compute_client::ComputeClient;
use crds::BareMetalHost;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use netbox_client::{NetBoxClient, NetBoxClientTrait};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Name the operator reports events under.
pub const CONTROLLER_NAME: &str = "bm-validation-operator";

const FIRMWARE_QUEUE_CAPACITY: usize = 1024;

/// Main controller for bare-metal validation.
pub struct Controller {
    host_watcher: JoinHandle<Result<(), ControllerError>>,
    firmware_watcher: JoinHandle<Result<(), ControllerError>>,
    firmware_worker: JoinHandle<()>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing bare-metal validation controller");
        let config = Arc::new(config);

        let kube_client = Client::try_default().await?;

        let netbox_client = NetBoxClient::new(config.netbox.url.clone(), config.netbox.token.clone())?;
        info!("Validating NetBox token and connectivity...");
        netbox_client.validate_token().await.map_err(|e| {
            error!("Failed to validate NetBox token: {}", e);
            error!("Please ensure the token is valid and NetBox is reachable at {}", config.netbox.url);
            ControllerError::NetBox(e)
        })?;
        info!("NetBox token validated and connectivity established");

        let compute = Arc::new(ComputeClient::connect_lazy(&config.compute_api_server_addr)?);
        let validators = SshValidatorFactory::from_config(&config).await?;
        let store: Arc<dyn HostStore> = Arc::new(KubeHostStore::new(kube_client.clone()));
        let metrics = Arc::new(Metrics::new()?);

        let services = Services {
            store: Arc::clone(&store),
            compute: compute.clone(),
            images: compute,
            validators: Arc::new(validators),
            netbox: Arc::new(netbox_client),
            events: Arc::new(KubeEventPublisher::new(kube_client.clone(), CONTROLLER_NAME)),
        };
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&config), services, Arc::clone(&metrics)));

        let (host_api, config_map_api): (Api<BareMetalHost>, Api<ConfigMap>) = match &config.watch_namespace {
            Some(ns) => {
                info!(namespace = %ns, "Watching a single namespace");
                (Api::namespaced(kube_client.clone(), ns), Api::namespaced(kube_client, ns))
            }
            None => (Api::all(kube_client.clone()), Api::all(kube_client)),
        };

        let (queue, requests) = FirmwareQueue::new(FIRMWARE_QUEUE_CAPACITY);

        let host_watcher = tokio::spawn(watch_hosts(host_api, Arc::clone(&reconciler)));
        let firmware_watcher = tokio::spawn(watch_firmware_maps(
            config_map_api.clone(),
            Arc::clone(&store),
            config.cloud_account_id.clone(),
            queue.clone(),
        ));
        let firmware_worker = tokio::spawn(run_firmware_worker(reconciler, queue.clone(), requests));
        let metrics_server = {
            let addr = config.metrics_addr.clone();
            tokio::spawn(async move { server::serve(&addr, metrics).await })
        };

        let cloud_account_id = config.cloud_account_id.clone();
        tokio::spawn(async move {
            if let Err(e) = firmware_sweep(config_map_api, store, cloud_account_id, queue).await {
                warn!("Startup firmware sweep failed (will continue): {}", e);
            }
        });

        Ok(Self {
            host_watcher,
            firmware_watcher,
            firmware_worker,
            metrics_server,
        })
    }

    /// Runs the controller until a background task exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Bare-metal validation controller running");

        tokio::select! {
            result = &mut self.host_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("BareMetalHost watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("BareMetalHost watcher error: {}", e)))?;
            }
            result = &mut self.firmware_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ConfigMap watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("ConfigMap watcher error: {}", e)))?;
            }
            result = &mut self.firmware_worker => {
                result.map_err(|e| ControllerError::Watch(format!("Firmware worker panicked: {}", e)))?;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
