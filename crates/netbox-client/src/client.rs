//! NetBox API client
//!
//! Implements the DCIM device calls the validation operator needs:
//! device lookup by name and the validation custom-field update.
//! Based on NetBox API structure: /api/dcim/devices/

use crate::common::HttpClient;
use crate::error::NetBoxError;
use crate::models::{Device, DeviceCustomFields, UpdateCustomFieldsRequest};
use crate::netbox_trait::NetBoxClientTrait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// NetBox API client
#[derive(Debug, Clone)]
pub struct NetBoxClient {
    http: HttpClient,
}

impl NetBoxClient {
    /// Create a new NetBox client
    ///
    /// # Arguments
    /// * `base_url` - NetBox base URL (e.g., "http://netbox:80")
    /// * `token` - API token for authentication
    pub fn new(base_url: String, token: String) -> Result<Self, NetBoxError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(NetBoxError::Http)?;

        Ok(Self {
            http: HttpClient::new(client, base_url, token),
        })
    }
}

#[async_trait::async_trait]
impl NetBoxClientTrait for NetBoxClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Validate the API token by requesting the lightweight status endpoint.
    async fn validate_token(&self) -> Result<(), NetBoxError> {
        debug!("Validating NetBox token and connectivity");
        let _: serde_json::Value = self.http.get("/api/status/").await?;
        debug!("Token validated successfully");
        Ok(())
    }

    async fn query_devices(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<Device>, NetBoxError> {
        debug!("Querying devices with filters: {:?}", filters);
        self.http.query("dcim/devices", filters, fetch_all).await
    }

    async fn get_device_id(&self, name: &str) -> Result<u64, NetBoxError> {
        let devices = self.query_devices(&[("name", name)], false).await?;
        match devices.as_slice() {
            [] => Err(NetBoxError::NotFound(format!("Device {name} not found"))),
            [device] => Ok(device.id),
            _ => Err(NetBoxError::Ambiguous(format!(
                "{} devices named {name}",
                devices.len()
            ))),
        }
    }

    async fn update_bm_validation_status(
        &self,
        device_id: u64,
        device_name: &str,
        fields: &DeviceCustomFields,
    ) -> Result<(), NetBoxError> {
        debug!(
            "Updating validation status of device {} ({}) to {}",
            device_name, device_id, fields.bm_validation_status
        );
        let path = format!("/api/dcim/devices/{device_id}/");
        let body = UpdateCustomFieldsRequest { custom_fields: fields };
        let _: Device = self.http.patch(&path, &body).await?;
        Ok(())
    }
}
