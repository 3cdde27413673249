//! Access to hosts, instances and firmware maps.
//!
//! [`HostStore::apply_labels`] is the only way the operator writes to a
//! host: read the latest object, compute the new label map from the
//! transitions, replace with the read resourceVersion, and start over on a
//! conflict.

use crate::error::ControllerError;
use crate::firmware::{FirmwareVersionMap, FIRMWARE_CONFIGMAP};
use crate::transitions::{apply_all, Transition};
use async_trait::async_trait;
use crds::{labels, BareMetalHost, Instance};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, warn};

/// Attempts of one label update before it is reported as a conflict.
pub const MAX_UPDATE_ATTEMPTS: usize = 5;

#[async_trait]
pub trait HostStore: Send + Sync {
    async fn get_host(&self, namespace: &str, name: &str) -> Result<Option<BareMetalHost>, ControllerError>;

    async fn list_hosts(&self, namespace: &str) -> Result<Vec<BareMetalHost>, ControllerError>;

    /// Hosts of every namespace labelled with `cluster_group_id`.
    async fn list_cluster_members(&self, cluster_group_id: &str) -> Result<Vec<BareMetalHost>, ControllerError>;

    /// Apply `transitions` to the latest labels of a host and return the updated host.
    ///
    /// Fails with [`ControllerError::Conflict`] after [`MAX_UPDATE_ATTEMPTS`] conflicting writes.
    async fn apply_labels(
        &self,
        namespace: &str,
        name: &str,
        transitions: &[Transition],
    ) -> Result<BareMetalHost, ControllerError>;

    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<Instance>, ControllerError>;

    /// Firmware map of a namespace, `None` when it has no firmware ConfigMap.
    async fn firmware_map(&self, namespace: &str) -> Result<Option<FirmwareVersionMap>, ControllerError>;
}

/// Store backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeHostStore {
    client: Client,
}

impl std::fmt::Debug for KubeHostStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeHostStore").finish_non_exhaustive()
    }
}

impl KubeHostStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn hosts(&self, namespace: &str) -> Api<BareMetalHost> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl HostStore for KubeHostStore {
    async fn get_host(&self, namespace: &str, name: &str) -> Result<Option<BareMetalHost>, ControllerError> {
        Ok(self.hosts(namespace).get_opt(name).await?)
    }

    async fn list_hosts(&self, namespace: &str) -> Result<Vec<BareMetalHost>, ControllerError> {
        Ok(self.hosts(namespace).list(&ListParams::default()).await?.items)
    }

    async fn list_cluster_members(&self, cluster_group_id: &str) -> Result<Vec<BareMetalHost>, ControllerError> {
        let api: Api<BareMetalHost> = Api::all(self.client.clone());
        let selector = format!("{}={}", labels::CLUSTER_GROUP_ID, cluster_group_id);
        Ok(api.list(&ListParams::default().labels(&selector)).await?.items)
    }

    async fn apply_labels(
        &self,
        namespace: &str,
        name: &str,
        transitions: &[Transition],
    ) -> Result<BareMetalHost, ControllerError> {
        let api = self.hosts(namespace);
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let mut host = api.get(name).await?;
            let next = apply_all(host.labels(), transitions);
            if &next == host.labels() {
                return Ok(host);
            }
            host.metadata.labels = Some(next);

            match api.replace(name, &PostParams::default(), &host).await {
                Ok(updated) => {
                    debug!(host = %name, namespace, ?transitions, "Updated host labels");
                    return Ok(updated);
                }
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    warn!(host = %name, namespace, attempt, "Conflict updating host labels, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ControllerError::Conflict(format!("{namespace}/{name}")))
    }

    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<Instance>, ControllerError> {
        let api: Api<Instance> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn firmware_map(&self, namespace: &str) -> Result<Option<FirmwareVersionMap>, ControllerError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(FIRMWARE_CONFIGMAP).await? {
            Some(config_map) => FirmwareVersionMap::from_config_map(&config_map),
            None => Ok(None),
        }
    }
}
