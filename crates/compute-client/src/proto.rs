//! Wire messages for the private compute and machine image services.
//!
//! Field tags match the `proto` package served by the compute API.

/// gRPC method paths
pub mod paths {
    pub const CREATE_MULTIPLE_PRIVATE: &str = "/proto.InstancePrivateService/CreateMultiplePrivate";
    pub const DELETE_PRIVATE: &str = "/proto.InstancePrivateService/DeletePrivate";
    pub const SEARCH_MACHINE_IMAGES: &str = "/proto.MachineImagePrivateService/SearchPrivate";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RunStrategy {
    Halted = 0,
    Always = 1,
    RerunOnFailure = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstanceCreateMultiplePrivateRequest {
    #[prost(message, repeated, tag = "1")]
    pub instances: Vec<InstanceCreatePrivateRequest>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstanceCreatePrivateRequest {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<InstanceMetadataCreatePrivate>,
    #[prost(message, optional, tag = "2")]
    pub spec: Option<InstanceSpecPrivate>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstanceMetadataCreatePrivate {
    #[prost(string, tag = "1")]
    pub cloud_account_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub resource_id: String,
    #[prost(bool, tag = "4")]
    pub skip_quota_check: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstanceSpecPrivate {
    #[prost(string, tag = "1")]
    pub availability_zone: String,
    #[prost(string, tag = "2")]
    pub instance_type: String,
    #[prost(string, tag = "3")]
    pub machine_image: String,
    #[prost(enumeration = "RunStrategy", tag = "4")]
    pub run_strategy: i32,
    #[prost(string, repeated, tag = "5")]
    pub ssh_public_key_names: Vec<String>,
    #[prost(message, repeated, tag = "6")]
    pub interfaces: Vec<NetworkInterfacePrivate>,
    #[prost(string, tag = "7")]
    pub cluster_group_id: String,
    #[prost(string, tag = "8")]
    pub cluster_id: String,
    #[prost(string, tag = "9")]
    pub node_id: String,
    #[prost(string, tag = "10")]
    pub instance_group: String,
    #[prost(string, tag = "11")]
    pub user_data: String,
    #[prost(string, tag = "12")]
    pub network_mode: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NetworkInterfacePrivate {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub v_net: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstanceCreateMultiplePrivateResponse {
    #[prost(message, repeated, tag = "1")]
    pub instances: Vec<InstancePrivate>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstancePrivate {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<InstanceMetadataPrivate>,
    #[prost(message, optional, tag = "2")]
    pub spec: Option<InstanceSpecPrivate>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstanceMetadataPrivate {
    #[prost(string, tag = "1")]
    pub cloud_account_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub resource_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstanceDeletePrivateRequest {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<InstanceMetadataReference>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstanceMetadataReference {
    #[prost(string, tag = "1")]
    pub cloud_account_id: String,
    #[prost(string, tag = "2")]
    pub resource_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MachineImageSearchRequest {
    #[prost(string, tag = "1")]
    pub instance_type: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MachineImageSearchResponse {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<MachineImage>,
}

/// A machine image and the firmware build versions it supports.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MachineImage {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, repeated, tag = "2")]
    pub firmware_versions: Vec<String>,
}

impl InstancePrivate {
    /// Name from the metadata, empty when absent.
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.as_ref().map_or("", |m| m.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_run_strategy_on_spec() {
        let spec = InstanceSpecPrivate {
            run_strategy: RunStrategy::RerunOnFailure as i32,
            ..Default::default()
        };
        assert_eq!(spec.run_strategy(), RunStrategy::RerunOnFailure);
    }

    #[test]
    fn test_create_request_encodes() {
        let request = InstanceCreateMultiplePrivateRequest {
            instances: vec![InstanceCreatePrivateRequest {
                metadata: Some(InstanceMetadataCreatePrivate {
                    cloud_account_id: "123456789012".to_string(),
                    name: "device-1-validation".to_string(),
                    resource_id: "r-1".to_string(),
                    skip_quota_check: true,
                }),
                spec: Some(InstanceSpecPrivate::default()),
            }],
        };
        let bytes = request.encode_to_vec();
        let decoded = InstanceCreateMultiplePrivateRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, request);
    }
}
