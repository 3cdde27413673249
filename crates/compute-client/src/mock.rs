//! Mock compute client for unit testing
//!
//! Serves a fixed image catalog per instance type, records create and delete
//! calls, and can be told to fail the next call of either kind.

use crate::compute_trait::{ComputeApi, ImageCatalog};
use crate::error::ComputeError;
use crate::proto::{
    InstanceCreateMultiplePrivateRequest, InstanceMetadataPrivate, InstancePrivate, MachineImage,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-memory compute API
#[derive(Debug, Clone, Default)]
pub struct MockComputeClient {
    images: Arc<Mutex<HashMap<String, Vec<MachineImage>>>>,
    created: Arc<Mutex<Vec<InstanceCreateMultiplePrivateRequest>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    create_error: Arc<Mutex<Option<tonic::Status>>>,
    delete_error: Arc<Mutex<Option<tonic::Status>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockComputeClient {
    /// Create an empty mock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image for `instance_type` supporting the given firmware versions
    pub fn add_image(&self, instance_type: &str, name: &str, firmware_versions: &[&str]) {
        lock(&self.images)
            .entry(instance_type.to_string())
            .or_default()
            .push(MachineImage {
                name: name.to_string(),
                firmware_versions: firmware_versions.iter().map(ToString::to_string).collect(),
            });
    }

    /// Fail the next create call with `status`
    pub fn fail_next_create(&self, status: tonic::Status) {
        *lock(&self.create_error) = Some(status);
    }

    /// Fail the next delete call with `status`
    pub fn fail_next_delete(&self, status: tonic::Status) {
        *lock(&self.delete_error) = Some(status);
    }

    /// Create requests received so far
    pub fn created(&self) -> Vec<InstanceCreateMultiplePrivateRequest> {
        lock(&self.created).clone()
    }

    /// Resource ids deleted so far
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }
}

#[async_trait::async_trait]
impl ComputeApi for MockComputeClient {
    async fn create_multiple(
        &self,
        request: InstanceCreateMultiplePrivateRequest,
    ) -> Result<Vec<InstancePrivate>, ComputeError> {
        if let Some(status) = lock(&self.create_error).take() {
            return Err(status.into());
        }
        let instances = request
            .instances
            .iter()
            .map(|i| {
                let meta = i.metadata.clone().unwrap_or_default();
                InstancePrivate {
                    metadata: Some(InstanceMetadataPrivate {
                        cloud_account_id: meta.cloud_account_id,
                        name: meta.name,
                        resource_id: meta.resource_id,
                    }),
                    spec: i.spec.clone(),
                }
            })
            .collect();
        lock(&self.created).push(request);
        Ok(instances)
    }

    async fn delete(&self, _cloud_account_id: &str, resource_id: &str) -> Result<(), ComputeError> {
        if let Some(status) = lock(&self.delete_error).take() {
            return Err(status.into());
        }
        lock(&self.deleted).push(resource_id.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ImageCatalog for MockComputeClient {
    async fn search(&self, instance_type: &str) -> Result<Vec<MachineImage>, ComputeError> {
        Ok(lock(&self.images)
            .get(instance_type)
            .cloned()
            .unwrap_or_default())
    }
}
