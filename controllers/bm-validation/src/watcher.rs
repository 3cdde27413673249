//! Kubernetes resource watchers.
//!
//! BareMetalHosts are reconciled through `kube_runtime::Controller`. Firmware
//! ConfigMaps are watched separately and fan out to the firmware queue.

use crate::error::ControllerError;
use crate::firmware::FIRMWARE_CONFIGMAP;
use crate::firmware_queue::{firmware_targets, FirmwareQueue};
use crate::reconciler::{Reconciler, Trigger};
use crate::store::HostStore;
use crds::BareMetalHost;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ListParams;
use kube::{Api, ResourceExt};
use kube_runtime::{controller::{Action, Config as ControllerConfig}, watcher, Controller, WatchStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Watch BareMetalHosts and run the validation state machine on every change.
pub async fn watch_hosts(api: Api<BareMetalHost>, reconciler: Arc<Reconciler>) -> Result<(), ControllerError> {
    info!("Starting BareMetalHost watcher");

    let error_policy = |host: Arc<BareMetalHost>, error: &ControllerError, reconciler: Arc<Reconciler>| {
        let namespace = host.namespace().unwrap_or_default();
        let delay = reconciler.backoff_delay(&namespace, &host.name_any());
        error!(host = %host.name_any(), namespace = %namespace, error = %error, ?delay, "Reconciliation failed");
        Action::requeue(delay)
    };

    let reconcile = |host: Arc<BareMetalHost>, reconciler: Arc<Reconciler>| async move {
        let namespace = host.namespace().unwrap_or_default();
        let name = host.name_any();
        debug!(host = %name, namespace = %namespace, "Reconciling BareMetalHost");
        let outcome = reconciler.reconcile(&namespace, &name, Trigger::Host).await?;
        reconciler.reset_backoff(&namespace, &name);
        Ok::<Action, ControllerError>(outcome.into())
    };

    // Debounce batches the label writes of one step into a single reconcile.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("BareMetalHost controller error: {}", e);
            }
        })
        .await;

    Ok(())
}

/// Watch the firmware ConfigMaps and queue the hosts of a namespace whose map changed.
pub async fn watch_firmware_maps(
    api: Api<ConfigMap>,
    store: Arc<dyn HostStore>,
    cloud_account_id: String,
    queue: FirmwareQueue,
) -> Result<(), ControllerError> {
    info!("Starting firmware ConfigMap watcher");
    let config = watcher::Config::default().fields(&format!("metadata.name={FIRMWARE_CONFIGMAP}"));
    let mut events = watcher(api, config).default_backoff().boxed();

    while let Some(event) = events.next().await {
        match event {
            // Init events replay existing maps; the startup sweep covers those.
            Ok(watcher::Event::Apply(config_map)) => {
                let namespace = config_map.namespace().unwrap_or_default();
                info!(namespace = %namespace, "Firmware map changed");
                if let Err(e) = enqueue_namespace(store.as_ref(), &namespace, &cloud_account_id, &queue).await {
                    error!(namespace = %namespace, error = %e, "Unable to list BareMetalHosts for firmware check");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Firmware ConfigMap watch error"),
        }
    }
    Ok(())
}

/// Queue a firmware check for the hosts of every namespace with a firmware map.
pub async fn firmware_sweep(
    api: Api<ConfigMap>,
    store: Arc<dyn HostStore>,
    cloud_account_id: String,
    queue: FirmwareQueue,
) -> Result<(), ControllerError> {
    let params = ListParams::default().fields(&format!("metadata.name={FIRMWARE_CONFIGMAP}"));
    let config_maps = api.list(&params).await?;
    for config_map in config_maps {
        let namespace = config_map.namespace().unwrap_or_default();
        enqueue_namespace(store.as_ref(), &namespace, &cloud_account_id, &queue).await?;
    }
    info!("Startup firmware sweep completed");
    Ok(())
}

async fn enqueue_namespace(
    store: &dyn HostStore,
    namespace: &str,
    cloud_account_id: &str,
    queue: &FirmwareQueue,
) -> Result<(), ControllerError> {
    let hosts = store.list_hosts(namespace).await?;
    for request in firmware_targets(&hosts, cloud_account_id) {
        info!(host = %request.name, namespace = %request.namespace, "Enqueueing firmware check");
        queue.enqueue(request);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{host_with_labels, InMemoryHostStore};
    use crds::{BareMetalHostStatus, ProvisionStatus, ProvisioningState};

    #[tokio::test]
    async fn test_enqueue_namespace() {
        let store = InMemoryHostStore::new();
        let mut available = host_with_labels("device-1", "metal3-1", &[]);
        available.status = Some(BareMetalHostStatus {
            provisioning: ProvisionStatus {
                state: ProvisioningState::Available,
                ..Default::default()
            },
            ..Default::default()
        });
        store.insert_host(available.clone());
        store.insert_host(host_with_labels("device-2", "metal3-1", &[]));
        let mut other_namespace = available;
        other_namespace.metadata.namespace = Some("metal3-2".to_string());
        store.insert_host(other_namespace);

        let (queue, mut rx) = FirmwareQueue::new(8);
        enqueue_namespace(&store, "metal3-1", "123456789012", &queue).await.unwrap();

        let request = rx.recv().await.unwrap();
        assert_eq!((request.namespace.as_str(), request.name.as_str()), ("metal3-1", "device-1"));
        assert!(rx.try_recv().is_err());
    }
}
