//! Validation instance requests
//!
//! Builds the compute API requests that provision hosts for validation:
//! one instance for a single host, or an instance group whose members can
//! reach each other over SSH with the operator's key.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use compute_client::{
    InstanceCreateMultiplePrivateRequest, InstanceCreatePrivateRequest, InstanceMetadataCreatePrivate,
    InstanceSpecPrivate, NetworkInterfacePrivate, RunStrategy,
};
use crds::{labels, BareMetalHost};
use kube::ResourceExt;
use rand::Rng;
use serde::Serialize;

/// Name used for the ssh key, the vnet suffix and the event reporter.
pub const OPERATOR_NAME: &str = "validationoperator";

const MEMBER_KEY_PATH: &str = "/home/sdp/.ssh/id_rsa";

/// Instance spec for validating `host` with `image`.
#[must_use]
pub fn instance_spec(
    config: &OperatorConfig,
    host: &BareMetalHost,
    instance_type: &str,
    image: &str,
) -> InstanceSpecPrivate {
    let az = &config.env_configuration.availability_zone;
    let network_mode = match host.label(labels::NETWORK_MODE).unwrap_or_default() {
        labels::NETWORK_MODE_XBX => labels::NETWORK_MODE_IGNORE_XBX,
        mode => mode,
    };
    InstanceSpecPrivate {
        availability_zone: az.clone(),
        instance_type: instance_type.to_string(),
        machine_image: image.to_string(),
        run_strategy: RunStrategy::RerunOnFailure as i32,
        ssh_public_key_names: vec![OPERATOR_NAME.to_string()],
        interfaces: vec![NetworkInterfacePrivate {
            name: "eth0".to_string(),
            v_net: format!("{az}-{OPERATOR_NAME}"),
        }],
        cluster_id: host.namespace().unwrap_or_default(),
        node_id: host.name_any(),
        network_mode: network_mode.to_string(),
        ..Default::default()
    }
}

/// Request for a single validation instance named `<host>-validation`.
#[must_use]
pub fn single_request(
    config: &OperatorConfig,
    host: &BareMetalHost,
    instance_type: &str,
    image: &str,
) -> InstanceCreateMultiplePrivateRequest {
    InstanceCreateMultiplePrivateRequest {
        instances: vec![InstanceCreatePrivateRequest {
            metadata: Some(metadata(config, format!("{}-validation", host.name_any()))),
            spec: Some(instance_spec(config, host, instance_type, image)),
        }],
    }
}

/// Parameters of a group request shared by all members.
#[derive(Debug, Clone)]
pub struct GroupRequest<'a> {
    pub instance_type: &'a str,
    pub image: &'a str,
    pub cluster_group_id: &'a str,
    pub validation_id: &'a str,
    pub user_data: &'a str,
}

/// Name of the instance group of a validation round.
#[must_use]
pub fn instance_group_name(cluster_group_id: &str, validation_id: &str) -> String {
    format!("{cluster_group_id}-validation-{validation_id}")
}

/// Request for one instance per host, all in the round's instance group.
#[must_use]
pub fn group_request(
    config: &OperatorConfig,
    hosts: &[BareMetalHost],
    group: &GroupRequest<'_>,
) -> InstanceCreateMultiplePrivateRequest {
    let group_name = instance_group_name(group.cluster_group_id, group.validation_id);
    let instances = hosts
        .iter()
        .enumerate()
        .map(|(i, host)| {
            let spec = InstanceSpecPrivate {
                instance_group: group_name.clone(),
                cluster_group_id: group.cluster_group_id.to_string(),
                user_data: group.user_data.to_string(),
                ..instance_spec(config, host, group.instance_type, group.image)
            };
            InstanceCreatePrivateRequest {
                metadata: Some(metadata(config, format!("{group_name}-{i}"))),
                spec: Some(spec),
            }
        })
        .collect();
    InstanceCreateMultiplePrivateRequest { instances }
}

fn metadata(config: &OperatorConfig, name: String) -> InstanceMetadataCreatePrivate {
    InstanceMetadataCreatePrivate {
        cloud_account_id: config.cloud_account_id.clone(),
        name,
        resource_id: uuid::Uuid::new_v4().to_string(),
        skip_quota_check: true,
    }
}

/// Random 8-digit validation id.
#[must_use]
pub fn generate_validation_id() -> String {
    rand::thread_rng().gen_range(10_000_000..100_000_000u32).to_string()
}

#[derive(Serialize)]
struct CloudConfig {
    write_files: Vec<WriteFile>,
    runcmd: Vec<String>,
}

#[derive(Serialize)]
struct WriteFile {
    path: String,
    encoding: String,
    content: String,
    permissions: String,
}

/// Cloud-init document installing `private_key` for the group's SSH user.
pub fn render_cloud_init(private_key: &[u8]) -> Result<String, ControllerError> {
    let config = CloudConfig {
        write_files: vec![WriteFile {
            path: MEMBER_KEY_PATH.to_string(),
            encoding: "b64".to_string(),
            content: BASE64.encode(private_key),
            permissions: "0400".to_string(),
        }],
        runcmd: vec![format!("chown sdp:sdp {MEMBER_KEY_PATH}")],
    };
    Ok(format!("#cloud-config\n{}", serde_yaml::to_string(&config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{host_with_labels, test_config};

    #[test]
    fn test_single_request() {
        let config = test_config();
        let host = host_with_labels("device-1", "metal3-1", &[(labels::NETWORK_MODE, "XBX")]);
        let request = single_request(&config, &host, "bm-spr", "ubuntu-v1");

        assert_eq!(request.instances.len(), 1);
        let meta = request.instances[0].metadata.clone().unwrap();
        assert_eq!(meta.name, "device-1-validation");
        assert_eq!(meta.cloud_account_id, config.cloud_account_id);
        assert!(meta.skip_quota_check);
        assert!(uuid::Uuid::parse_str(&meta.resource_id).is_ok());

        let spec = request.instances[0].spec.clone().unwrap();
        assert_eq!(spec.cluster_id, "metal3-1");
        assert_eq!(spec.node_id, "device-1");
        assert_eq!(spec.network_mode, labels::NETWORK_MODE_IGNORE_XBX);
        assert_eq!(spec.run_strategy(), RunStrategy::RerunOnFailure);
        assert_eq!(spec.ssh_public_key_names, vec![OPERATOR_NAME.to_string()]);
        assert_eq!(spec.interfaces[0].v_net, "us-dev-1a-validationoperator");
        assert!(spec.instance_group.is_empty());
    }

    #[test]
    fn test_group_request() {
        let config = test_config();
        let hosts = vec![
            host_with_labels("device-1", "metal3-1", &[]),
            host_with_labels("device-2", "metal3-1", &[(labels::NETWORK_MODE, "VVV")]),
        ];
        let request = group_request(
            &config,
            &hosts,
            &GroupRequest {
                instance_type: "bm-icp-gaudi2",
                image: "gaudi-v2",
                cluster_group_id: "cg-1",
                validation_id: "12345678",
                user_data: "#cloud-config\n",
            },
        );

        let names: Vec<_> = request
            .instances
            .iter()
            .map(|i| i.metadata.clone().unwrap().name)
            .collect();
        assert_eq!(names, vec!["cg-1-validation-12345678-0", "cg-1-validation-12345678-1"]);

        let spec = request.instances[1].spec.clone().unwrap();
        assert_eq!(spec.node_id, "device-2");
        assert_eq!(spec.instance_group, "cg-1-validation-12345678");
        assert_eq!(spec.cluster_group_id, "cg-1");
        assert_eq!(spec.network_mode, "VVV");
        assert_eq!(spec.user_data, "#cloud-config\n");
    }

    #[test]
    fn test_validation_id_has_eight_digits() {
        for _ in 0..100 {
            let id = generate_validation_id();
            assert_eq!(id.len(), 8);
            assert!(id.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_cloud_init() {
        let rendered = render_cloud_init(b"-----BEGIN KEY-----").unwrap();
        assert!(rendered.starts_with("#cloud-config\n"));

        let doc: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        let file = &doc["write_files"][0];
        assert_eq!(file["path"].as_str(), Some(MEMBER_KEY_PATH));
        assert_eq!(file["permissions"].as_str(), Some("0400"));
        let key = BASE64.decode(file["content"].as_str().unwrap()).unwrap();
        assert_eq!(key, b"-----BEGIN KEY-----");
        assert_eq!(doc["runcmd"][0].as_str(), Some("chown sdp:sdp /home/sdp/.ssh/id_rsa"));
    }
}
