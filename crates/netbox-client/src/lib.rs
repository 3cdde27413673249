//! NetBox REST API Client
//!
//! Minimal client for the NetBox DCIM API, used by the bare-metal validation
//! operator to publish validation status on the inventory record of a device.
//!
//! # Example
//!
//! ```no_run
//! use netbox_client::{DeviceCustomFields, NetBoxClient, NetBoxClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = NetBoxClient::new(
//!     "http://netbox:80".to_string(),
//!     "your-api-token".to_string(),
//! )?;
//!
//! let device_id = client.get_device_id("device-1").await?;
//! let fields = DeviceCustomFields::in_progress();
//! client.update_bm_validation_status(device_id, "device-1", &fields).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod netbox_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::NetBoxClient;
pub use common::{HttpClient, PaginatedResponse};
pub use error::NetBoxError;
pub use models::*;
pub use netbox_trait::NetBoxClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockNetBoxClient;
