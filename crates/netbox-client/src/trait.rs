//! NetBoxClient trait for mocking
//!
//! This trait abstracts the NetBoxClient to enable mocking in unit tests.
//! The concrete NetBoxClient implements this trait, and tests can use mock implementations.

use crate::error::NetBoxError;
use crate::models::{Device, DeviceCustomFields};

/// Trait for NetBox API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait NetBoxClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Validate the API token
    async fn validate_token(&self) -> Result<(), NetBoxError>;

    /// Query devices by filters
    async fn query_devices(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<Device>, NetBoxError>;

    /// Resolve the id of the device with exactly this name
    async fn get_device_id(&self, name: &str) -> Result<u64, NetBoxError>;

    /// Write the validation status custom fields of a device
    async fn update_bm_validation_status(
        &self,
        device_id: u64,
        device_name: &str,
        fields: &DeviceCustomFields,
    ) -> Result<(), NetBoxError>;
}
