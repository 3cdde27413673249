//! NetBox API data models
//!
//! Only the DCIM device fields the validation operator reads or writes.

use serde::{Deserialize, Serialize};

/// Device model (from DCIM API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub display: String,
    pub name: String,
    #[serde(default)]
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Validation custom fields on a device record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceCustomFields {
    /// `InProgress`, `Success <time>` or `Failure <time>`
    pub bm_validation_status: String,
    /// Link to the uploaded validation report, `--` when unknown
    pub bm_validation_report_url: String,
}

impl DeviceCustomFields {
    /// Placeholder written when no report is available.
    pub const NO_REPORT: &'static str = "--";

    /// Fields for a validation that has started.
    #[must_use]
    pub fn in_progress() -> Self {
        Self {
            bm_validation_status: "InProgress".to_string(),
            bm_validation_report_url: Self::NO_REPORT.to_string(),
        }
    }
}

/// Request body for patching device custom fields
#[derive(Debug, Clone, Serialize)]
pub struct UpdateCustomFieldsRequest<'a> {
    pub custom_fields: &'a DeviceCustomFields,
}
