//! BareMetalHost resource
//!
//! Subset of the metal3 `BareMetalHost` schema the validation operator reads.
//! The resource is owned by metal3; the operator never writes spec or status.

use crate::labels;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "metal3.io",
    version = "v1alpha1",
    kind = "BareMetalHost",
    namespaced,
    status = "BareMetalHostStatus",
    shortname = "bmh"
)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostSpec {
    /// Whether the host should be powered on
    #[serde(default)]
    pub online: bool,

    /// MAC address of the provisioning NIC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_mac_address: Option<String>,

    /// Object currently consuming this host (an `Instance` while provisioned)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_ref: Option<ConsumerRef>,
}

/// Reference to the object that consumes a host.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostStatus {
    /// Provisioning state as reported by metal3
    #[serde(default)]
    pub provisioning: ProvisionStatus,

    /// Start and end times of the last operations
    #[serde(default)]
    pub operation_history: OperationHistory,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionStatus {
    #[serde(default)]
    pub state: ProvisioningState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperationHistory {
    #[serde(default)]
    pub register: OperationMetric,
    #[serde(default)]
    pub inspect: OperationMetric,
    #[serde(default)]
    pub provision: OperationMetric,
    #[serde(default)]
    pub deprovision: OperationMetric,
}

/// Start/end of one metal3 operation. A zero time is serialized as null.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetric {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl OperationMetric {
    /// Returns the start time when the operation started and has not ended.
    #[must_use]
    pub fn pending_since(&self) -> Option<DateTime<Utc>> {
        match (self.start, self.end) {
            (Some(start), None) => Some(start),
            _ => None,
        }
    }
}

/// metal3 provisioning states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ProvisioningState {
    #[serde(rename = "")]
    #[default]
    None,
    #[serde(rename = "unmanaged")]
    Unmanaged,
    #[serde(rename = "registering")]
    Registering,
    #[serde(rename = "match profile")]
    MatchProfile,
    #[serde(rename = "preparing")]
    Preparing,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "available")]
    Available,
    #[serde(rename = "provisioning")]
    Provisioning,
    #[serde(rename = "provisioned")]
    Provisioned,
    #[serde(rename = "externally provisioned")]
    ExternallyProvisioned,
    #[serde(rename = "deprovisioning")]
    Deprovisioning,
    #[serde(rename = "inspecting")]
    Inspecting,
    #[serde(rename = "powering off before delete")]
    PoweringOffBeforeDelete,
    #[serde(rename = "deleting")]
    Deleting,
    #[serde(rename = "detached")]
    Detached,
    #[serde(other)]
    Unknown,
}

impl BareMetalHost {
    /// Returns the value of a label.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    /// Returns true when the label is present, whatever its value.
    #[must_use]
    pub fn has_label(&self, key: &str) -> bool {
        self.label(key).is_some()
    }

    /// Instance types this host is tagged with (`instance-type.cloud.intel.com/<type>=true`).
    #[must_use]
    pub fn instance_types(&self) -> Vec<&str> {
        let Some(host_labels) = self.metadata.labels.as_ref() else {
            return Vec::new();
        };
        host_labels
            .iter()
            .filter(|(_, v)| v.as_str() == labels::TRUE)
            .filter_map(|(k, _)| k.strip_prefix(labels::INSTANCE_TYPE_PREFIX))
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Current metal3 provisioning state.
    #[must_use]
    pub fn provisioning_state(&self) -> ProvisioningState {
        self.status
            .as_ref()
            .map(|s| s.provisioning.state)
            .unwrap_or_default()
    }

    /// Operation history, empty when status is absent.
    #[must_use]
    pub fn operation_history(&self) -> OperationHistory {
        self.status
            .as_ref()
            .map(|s| s.operation_history.clone())
            .unwrap_or_default()
    }

    /// True when the host is consumed by an instance created under `cloud_account_id`.
    #[must_use]
    pub fn is_owned_by(&self, cloud_account_id: &str) -> bool {
        self.spec
            .consumer_ref
            .as_ref()
            .is_some_and(|r| r.namespace == cloud_account_id)
    }
}
