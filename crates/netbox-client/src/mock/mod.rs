//! Mock NetBoxClient for unit testing
//!
//! Stores devices in memory and records every validation status update so
//! tests can assert on what would have been written to NetBox.

use crate::error::NetBoxError;
use crate::models::{Device, DeviceCustomFields};
use crate::netbox_trait::NetBoxClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock NetBoxClient for testing
#[derive(Debug, Clone)]
pub struct MockNetBoxClient {
    pub(crate) base_url: String,
    pub(crate) devices: Arc<Mutex<HashMap<u64, Device>>>,
    pub(crate) status_updates: Arc<Mutex<Vec<(String, DeviceCustomFields)>>>,
    pub(crate) next_id: Arc<Mutex<u64>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockNetBoxClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            devices: Arc::new(Mutex::new(HashMap::new())),
            status_updates: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Add a device with the given name (for test setup), returning its id
    pub fn add_device(&self, name: &str) -> u64 {
        let id = {
            let mut next = lock(&self.next_id);
            let current = *next;
            *next += 1;
            current
        };
        let device = Device {
            id,
            url: format!("{}/api/dcim/devices/{}/", self.base_url, id),
            display: name.to_string(),
            name: name.to_string(),
            custom_fields: serde_json::Map::new(),
            last_updated: None,
        };
        lock(&self.devices).insert(id, device);
        id
    }

    /// Status updates recorded so far, as (device name, fields)
    pub fn status_updates(&self) -> Vec<(String, DeviceCustomFields)> {
        lock(&self.status_updates).clone()
    }
}

#[async_trait::async_trait]
impl NetBoxClientTrait for MockNetBoxClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_token(&self) -> Result<(), NetBoxError> {
        Ok(())
    }

    async fn query_devices(&self, filters: &[(&str, &str)], _fetch_all: bool) -> Result<Vec<Device>, NetBoxError> {
        let name = filters.iter().find(|(k, _)| *k == "name").map(|(_, v)| *v);
        Ok(lock(&self.devices)
            .values()
            .filter(|d| name.is_none_or(|n| d.name == n))
            .cloned()
            .collect())
    }

    async fn get_device_id(&self, name: &str) -> Result<u64, NetBoxError> {
        lock(&self.devices)
            .values()
            .find(|d| d.name == name)
            .map(|d| d.id)
            .ok_or_else(|| NetBoxError::NotFound(format!("Device {name} not found")))
    }

    async fn update_bm_validation_status(
        &self,
        device_id: u64,
        device_name: &str,
        fields: &DeviceCustomFields,
    ) -> Result<(), NetBoxError> {
        let mut devices = lock(&self.devices);
        let device = devices
            .get_mut(&device_id)
            .ok_or_else(|| NetBoxError::NotFound(format!("Device {device_id} not found")))?;
        device.custom_fields = match serde_json::to_value(fields)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        lock(&self.status_updates).push((device_name.to_string(), fields.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_records_fields() {
        let mock = MockNetBoxClient::new("http://test-netbox");
        let id = mock.add_device("device-1");
        assert_eq!(mock.get_device_id("device-1").await.unwrap(), id);

        mock.update_bm_validation_status(id, "device-1", &DeviceCustomFields::in_progress())
            .await
            .unwrap();

        let updates = mock.status_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.bm_validation_status, "InProgress");
        assert_eq!(updates[0].1.bm_validation_report_url, "--");
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let mock = MockNetBoxClient::new("http://test-netbox");
        assert!(matches!(
            mock.get_device_id("missing").await,
            Err(NetBoxError::NotFound(_))
        ));
    }
}
