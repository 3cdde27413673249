//! Compute API traits for mocking
//!
//! The reconciler only sees these traits; `ComputeClient` implements both and
//! tests use `MockComputeClient`.

use crate::error::ComputeError;
use crate::proto::{InstanceCreateMultiplePrivateRequest, InstancePrivate, MachineImage};

/// Instance lifecycle operations
#[async_trait::async_trait]
pub trait ComputeApi: Send + Sync {
    /// Create every instance in the request atomically
    async fn create_multiple(
        &self,
        request: InstanceCreateMultiplePrivateRequest,
    ) -> Result<Vec<InstancePrivate>, ComputeError>;

    /// Delete an instance by resource id
    async fn delete(&self, cloud_account_id: &str, resource_id: &str) -> Result<(), ComputeError>;
}

/// Machine image catalog
#[async_trait::async_trait]
pub trait ImageCatalog: Send + Sync {
    /// List the images available for an instance type
    async fn search(&self, instance_type: &str) -> Result<Vec<MachineImage>, ComputeError>;
}
