//! Instance resource
//!
//! A compute instance provisioned on a `BareMetalHost`. Created through the compute
//! API; the operator reads its phase, addresses and SSH proxy details.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "private.cloud.intel.com",
    version = "v1alpha1",
    kind = "Instance",
    namespaced,
    status = "InstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub machine_image: String,
    /// Name of the host the instance runs on
    #[serde(default)]
    pub node_id: String,
    /// Instance group, `<clusterId>-validation-<validationId>` for group validation
    #[serde(default)]
    pub instance_group: String,
    #[serde(default)]
    pub cluster_group_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    #[serde(default)]
    pub phase: InstancePhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub interfaces: Vec<InstanceInterfaceStatus>,

    #[serde(default)]
    pub ssh_proxy: SshProxyTunnelStatus,

    /// Login user on the instance
    #[serde(default)]
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInterfaceStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// Bastion through which the instance is reachable.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SshProxyTunnelStatus {
    #[serde(default)]
    pub proxy_user: String,
    #[serde(default)]
    pub proxy_address: String,
    #[serde(default)]
    pub proxy_port: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum InstancePhase {
    #[default]
    Provisioning,
    Ready,
    Stopping,
    Stopped,
    Starting,
    Started,
    Terminating,
    Failed,
}

impl Instance {
    /// Phase of the instance, `Provisioning` when status is absent.
    #[must_use]
    pub fn phase(&self) -> InstancePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// First address of the first interface.
    #[must_use]
    pub fn primary_address(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .interfaces
            .first()?
            .addresses
            .first()
            .map(String::as_str)
    }

    /// Validation id encoded as the last `-` segment of the instance group.
    #[must_use]
    pub fn validation_id(&self) -> Option<&str> {
        if self.spec.instance_group.is_empty() {
            return None;
        }
        self.spec.instance_group.rsplit('-').next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_validation_id_from_group() {
        let mut inst = Instance::new("inst-0", InstanceSpec::default());
        assert_eq!(inst.validation_id(), None);
        inst.spec.instance_group = "cluster-a-validation-12345678".to_string();
        assert_eq!(inst.validation_id(), Some("12345678"));
    }

    #[test]
    fn test_primary_address() {
        let mut inst = Instance::new("inst-0", InstanceSpec::default());
        assert_eq!(inst.primary_address(), None);
        inst.status = Some(InstanceStatus {
            phase: InstancePhase::Ready,
            interfaces: vec![InstanceInterfaceStatus {
                name: "eth0".to_string(),
                addresses: vec!["10.0.0.5".to_string(), "10.0.0.6".to_string()],
            }],
            ..Default::default()
        });
        assert_eq!(inst.primary_address(), Some("10.0.0.5"));
        assert_eq!(inst.phase(), InstancePhase::Ready);
    }

    #[test]
    fn test_crd_renders() {
        let yaml = serde_yaml::to_string(&Instance::crd()).unwrap();
        assert!(yaml.contains("private.cloud.intel.com"));
    }
}
