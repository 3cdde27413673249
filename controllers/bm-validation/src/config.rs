//! Operator configuration.
//!
//! Loaded from a YAML file (path from `--config` or `CONFIG_FILE`), then
//! overridden by a few environment variables the way the other controllers
//! in this repository are configured.

use crate::error::ControllerError;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/bm-validation/config.yaml";

/// Top-level operator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Cloud account the validation instances are created under
    pub cloud_account_id: String,
    /// Instance types that go through validation; other hosts are marked verified
    #[serde(default)]
    pub enabled_instance_types: Vec<String>,
    #[serde(default)]
    pub feature_flags: FeatureFlags,
    /// Region and availability zone of this deployment
    #[serde(default)]
    pub env_configuration: EnvConfiguration,
    /// Where validation reports are uploaded
    #[serde(default)]
    pub validation_report_s3_config: ValidationReportS3Config,
    /// Base URL of the validation task repository
    pub validation_task_repository_url: String,
    #[serde(default)]
    pub validation_task_version: ValidationTaskVersion,
    /// Key used for both the bastion and the instance hop
    pub ssh_config: SshConfig,
    /// Address of the compute private API (gRPC)
    pub compute_api_server_addr: String,
    /// Token separating an image name from its version suffix
    #[serde(default = "default_image_version_delimiter")]
    pub image_version_delimiter: String,
    #[serde(default)]
    pub netbox: NetBoxConfig,
    /// Local path of the script that launches the validation task
    #[serde(default = "default_wrapper_script_path")]
    pub wrapper_script_path: PathBuf,
    /// Directory the validation archives are cached in
    #[serde(default = "default_cache_base_path")]
    pub cache_base_path: PathBuf,
    /// Listen address of the metrics and health endpoints
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    /// Namespace to watch; all namespaces when unset
    #[serde(default)]
    pub watch_namespace: Option<String>,
}

/// Optional behaviors of the operator
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    /// Validate cluster groups together after per-host validation
    #[serde(default)]
    pub group_validation: bool,
    /// Instance types validated as a group when `group_validation` is set
    #[serde(default)]
    pub enabled_group_instance_types: Vec<String>,
    /// Re-enroll verified hosts whose firmware is behind the firmware map
    #[serde(default)]
    pub enable_firmware_upgrade: bool,
    /// Deprovision the instance even when validation failed
    #[serde(default)]
    pub de_provision_post_validation_failure: bool,
}

/// Deployment environment passed to the validation task
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvConfiguration {
    /// Region, the first segment of the report upload path
    #[serde(default)]
    pub region: String,
    /// Availability zone, the second segment of the report upload path
    #[serde(default)]
    pub availability_zone: String,
    /// Token file for model downloads; empty when unused
    #[serde(default)]
    pub hugging_face_token_file_path: PathBuf,
}

/// Report bucket and the credentials the task uploads with
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReportS3Config {
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default)]
    pub s3_access_key_file_path: PathBuf,
    #[serde(default)]
    pub s3_secret_access_key_file_path: PathBuf,
    /// Proxy the task uploads through
    #[serde(default)]
    pub https_proxy: String,
    /// Prefix turning an upload path into a browsable report URL
    #[serde(default)]
    pub cloudfront_prefix: String,
}

/// Validation archive versions per instance type
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationTaskVersion {
    /// Instance type to single-host archive version
    #[serde(default)]
    pub instance_version_map: HashMap<String, String>,
    /// Instance type to group archive version
    #[serde(default)]
    pub cluster_version_map: HashMap<String, String>,
}

/// SSH settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    pub private_key_file_path: PathBuf,
}

/// NetBox connection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetBoxConfig {
    /// Base URL of the NetBox API
    #[serde(default)]
    pub url: String,
    /// File holding the API token, read when `NETBOX_TOKEN` is unset
    #[serde(default)]
    pub token_file_path: Option<PathBuf>,
    /// Set from `NETBOX_TOKEN` or the token file, never from YAML
    #[serde(skip)]
    pub token: String,
}

fn default_image_version_delimiter() -> String {
    "-v".to_string()
}

fn default_wrapper_script_path() -> PathBuf {
    PathBuf::from("wrapper_script.sh")
}

fn default_cache_base_path() -> PathBuf {
    PathBuf::from("/tmp/")
}

fn default_metrics_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl OperatorConfig {
    /// Parse a configuration document without touching the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ControllerError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file and apply environment overrides.
    pub async fn load(path: &Path) -> Result<Self, ControllerError> {
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            ControllerError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_yaml(&yaml)?;
        config.apply_env_overrides();
        config.load_netbox_token().await?;
        Ok(config)
    }

    /// Path of the configuration file: `--config <path>`, then `CONFIG_FILE`, then the default.
    #[must_use]
    pub fn path_from_args(args: &[String]) -> PathBuf {
        args.windows(2)
            .find(|w| w[0] == "--config")
            .map(|w| PathBuf::from(&w[1]))
            .or_else(|| env::var("CONFIG_FILE").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(ns) = env::var("WATCH_NAMESPACE") {
            self.watch_namespace = Some(ns).filter(|n| !n.is_empty());
        }
        if let Ok(url) = env::var("NETBOX_URL") {
            self.netbox.url = url;
        }
        if let Ok(token) = env::var("NETBOX_TOKEN") {
            self.netbox.token = token;
        }
    }

    async fn load_netbox_token(&mut self) -> Result<(), ControllerError> {
        if !self.netbox.token.is_empty() {
            return Ok(());
        }
        match &self.netbox.token_file_path {
            Some(path) => {
                self.netbox.token = read_secret(path).await?;
                Ok(())
            }
            None => Err(ControllerError::InvalidConfig(
                "NETBOX_TOKEN environment variable or netbox.tokenFilePath is required".to_string(),
            )),
        }
    }

    fn validate(&self) -> Result<(), ControllerError> {
        let required = [
            ("cloudAccountId", &self.cloud_account_id),
            ("validationTaskRepositoryUrl", &self.validation_task_repository_url),
            ("computeApiServerAddr", &self.compute_api_server_addr),
            ("imageVersionDelimiter", &self.image_version_delimiter),
        ];
        for (key, value) in required {
            if value.is_empty() {
                return Err(ControllerError::InvalidConfig(format!("{key} must be set")));
            }
        }
        Ok(())
    }

    /// True when validation runs for hosts of `instance_type`.
    #[must_use]
    pub fn is_instance_type_enabled(&self, instance_type: &str) -> bool {
        self.enabled_instance_types.iter().any(|t| t == instance_type)
    }

    /// True when hosts of `instance_type` that belong to a cluster group are validated as a group.
    #[must_use]
    pub fn is_group_validation_enabled(&self, instance_type: &str) -> bool {
        self.feature_flags.group_validation
            && self
                .feature_flags
                .enabled_group_instance_types
                .iter()
                .any(|t| t == instance_type)
    }
}

/// Read a credential file, dropping the trailing newline.
pub async fn read_secret(path: &Path) -> Result<String, ControllerError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("cannot read {}: {e}", path.display())))?;
    Ok(raw.strip_suffix('\n').unwrap_or(&raw).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r"
cloudAccountId: '123456789012'
enabledInstanceTypes: [bm-icp-gaudi2, bm-spr]
featureFlags:
  groupValidation: true
  enabledGroupInstanceTypes: [bm-icp-gaudi2]
  enableFirmwareUpgrade: true
envConfiguration:
  region: us-dev-1
  availabilityZone: us-dev-1a
validationTaskRepositoryUrl: https://artifacts.example.com
validationTaskVersion:
  instanceVersionMap:
    bm-icp-gaudi2: 0.0.3
sshConfig:
  privateKeyFilePath: /etc/ssh-keys/id_rsa
computeApiServerAddr: compute-api:80
netbox:
  url: http://netbox.netbox:80
";

    #[test]
    fn test_parse_with_defaults() {
        let config = OperatorConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(config.cloud_account_id, "123456789012");
        assert_eq!(config.image_version_delimiter, "-v");
        assert_eq!(config.cache_base_path, PathBuf::from("/tmp/"));
        assert_eq!(config.metrics_addr, "0.0.0.0:8080");
        assert!(!config.feature_flags.de_provision_post_validation_failure);
        assert_eq!(
            config.validation_task_version.instance_version_map.get("bm-icp-gaudi2").map(String::as_str),
            Some("0.0.3")
        );
    }

    #[test]
    fn test_instance_type_flags() {
        let config = OperatorConfig::from_yaml(CONFIG).unwrap();
        assert!(config.is_instance_type_enabled("bm-spr"));
        assert!(!config.is_instance_type_enabled("bm-icx"));
        assert!(config.is_group_validation_enabled("bm-icp-gaudi2"));
        assert!(!config.is_group_validation_enabled("bm-spr"));
    }

    #[test]
    fn test_missing_required_value() {
        let yaml = CONFIG.replace("computeApiServerAddr: compute-api:80", "computeApiServerAddr: ''");
        assert!(matches!(
            OperatorConfig::from_yaml(&yaml),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_path_from_args() {
        let args = vec!["bm-validation".to_string(), "--config".to_string(), "/tmp/c.yaml".to_string()];
        assert_eq!(OperatorConfig::path_from_args(&args), PathBuf::from("/tmp/c.yaml"));
    }

    #[tokio::test]
    async fn test_read_secret_trims_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "s3-access-key").unwrap();
        assert_eq!(read_secret(file.path()).await.unwrap(), "s3-access-key");
    }
}
