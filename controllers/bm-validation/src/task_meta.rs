//! Per-reconcile description of a validation task.
//!
//! Everything that differs between the instance task and the group task
//! (artifact, repository path, report path, environment) is derived here
//! from a [`ValidationMode`].

use crate::config::OperatorConfig;
use crate::firmware::Version;
use chrono::{DateTime, Utc};
use crds::{labels, BareMetalHost};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Archive name used when no version is configured for an instance type.
pub const DEFAULT_ARTIFACT: &str = "/validation.tar.gz";

/// Which task is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Single-host validation
    Instance,
    /// Interconnect validation across a cluster group, run from the master
    Group,
}

/// Credentials and proxy settings handed to the task.
#[derive(Clone, Default)]
pub struct TaskCredentials {
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub hugging_face_token: String,
    pub bucket: String,
    pub https_proxy: String,
}

impl std::fmt::Debug for TaskCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCredentials")
            .field("bucket", &self.bucket)
            .field("https_proxy", &self.https_proxy)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMeta {
    pub instance_type: String,
    pub region: String,
    pub availability_zone: String,
    pub namespace: String,
    pub host_name: String,
    /// Set when the host takes part in group validation
    pub cluster_group_id: Option<String>,
    pub instance_artifact: String,
    pub cluster_artifact: String,
    /// Value of the test configuration label, empty when absent
    pub test_config: String,
}

impl TaskMeta {
    #[must_use]
    pub fn new(instance_type: &str, config: &OperatorConfig, host: &BareMetalHost) -> Self {
        let versions = &config.validation_task_version;
        let cluster_group_id = host
            .label(labels::CLUSTER_GROUP_ID)
            .filter(|id| !id.is_empty() && config.is_group_validation_enabled(instance_type))
            .map(str::to_string);

        Self {
            instance_type: instance_type.to_string(),
            region: config.env_configuration.region.clone(),
            availability_zone: config.env_configuration.availability_zone.clone(),
            namespace: host.namespace().unwrap_or_default(),
            host_name: host.name_any(),
            cluster_group_id,
            instance_artifact: artifact_name(versions.instance_version_map.get(instance_type)),
            cluster_artifact: artifact_name(versions.cluster_version_map.get(instance_type)),
            test_config: host.label(labels::TEST_CONFIGURATION).unwrap_or_default().to_string(),
        }
    }

    /// True when both archives are needed.
    #[must_use]
    pub fn is_cluster(&self) -> bool {
        self.cluster_group_id.is_some()
    }

    /// Catalog directory of the task, `<type>` or `<type>/cluster`.
    #[must_use]
    pub fn repo_path(&self, mode: ValidationMode) -> String {
        match mode {
            ValidationMode::Instance => self.instance_type.clone(),
            ValidationMode::Group => format!("{}/cluster", self.instance_type),
        }
    }

    #[must_use]
    pub fn artifact(&self, mode: ValidationMode) -> &str {
        match mode {
            ValidationMode::Instance => &self.instance_artifact,
            ValidationMode::Group => &self.cluster_artifact,
        }
    }

    /// URL of the archive in the task repository.
    #[must_use]
    pub fn repository_url(&self, repository: &str, mode: ValidationMode) -> String {
        format!(
            "{}/validation_repository/catalog/{}{}",
            repository.trim_end_matches('/'),
            self.repo_path(mode),
            self.artifact(mode)
        )
    }

    /// Local cache location of the archive.
    #[must_use]
    pub fn cache_path(&self, cache_base: &Path, mode: ValidationMode) -> PathBuf {
        cache_base
            .join(self.repo_path(mode))
            .join(self.artifact(mode).trim_start_matches('/'))
    }

    /// Upload path of the task's report, `/<region>/<az>/<namespace>/<host>-<timestamp>[-group]`.
    #[must_use]
    pub fn report_path(&self, mode: ValidationMode, now: DateTime<Utc>) -> String {
        let suffix = match mode {
            ValidationMode::Instance => "",
            ValidationMode::Group => "-group",
        };
        let dir: String = [&self.region, &self.availability_zone, &self.namespace]
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(|p| format!("/{p}"))
            .collect();
        format!(
            "{dir}/{}-{}{}",
            self.host_name,
            now.format("%Y%m%d%H%M%S"),
            suffix
        )
    }

    /// Environment of the task process.
    #[must_use]
    pub fn task_env(
        &self,
        mode: ValidationMode,
        credentials: &TaskCredentials,
        firmware: &Version,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let mut env = BTreeMap::from([
            ("uploadPath".to_string(), self.report_path(mode, now)),
            ("s3Key".to_string(), credentials.s3_access_key.clone()),
            ("s3Secret".to_string(), credentials.s3_secret_key.clone()),
            ("huggingFaceToken".to_string(), credentials.hugging_face_token.clone()),
            ("bucket".to_string(), credentials.bucket.clone()),
            ("https_proxy".to_string(), credentials.https_proxy.clone()),
            ("bmhName".to_string(), self.host_name.clone()),
            ("instanceType".to_string(), self.instance_type.clone()),
            ("region".to_string(), self.region.clone()),
            ("az".to_string(), self.availability_zone.clone()),
            ("TEST_CONFIGURATION".to_string(), self.test_config.clone()),
            ("BUILD_VERSION".to_string(), firmware.build_version.clone()),
            ("SPI_VERSION".to_string(), firmware.spi_version.clone()),
            ("FULL_FW_VERSION".to_string(), firmware.full_fw_version.clone()),
        ]);
        if let Some(id) = &self.cluster_group_id {
            env.insert("clusterGroupId".to_string(), id.clone());
        }
        env
    }
}

fn artifact_name(version: Option<&String>) -> String {
    match version {
        Some(v) if !v.is_empty() => format!("/validation-{v}.tar.gz"),
        _ => DEFAULT_ARTIFACT.to_string(),
    }
}

/// Render `env` as `NAME='value' ...` assignments prefixing a shell command.
#[must_use]
pub fn render_env(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(k, v)| format!("{k}='{}' ", v.replace('\'', r"'\''")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{host_with_labels, test_config};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 4, 10, 30, 15).unwrap()
    }

    #[test]
    fn test_instance_meta() {
        let config = test_config();
        let host = host_with_labels("device-1", "metal3-1", &[(labels::TEST_CONFIGURATION, "quick")]);
        let meta = TaskMeta::new("bm-spr", &config, &host);

        assert!(!meta.is_cluster());
        assert_eq!(meta.instance_artifact, DEFAULT_ARTIFACT);
        assert_eq!(meta.test_config, "quick");
        assert_eq!(meta.repo_path(ValidationMode::Instance), "bm-spr");
        assert_eq!(
            meta.repository_url("https://repo.example.com/", ValidationMode::Instance),
            "https://repo.example.com/validation_repository/catalog/bm-spr/validation.tar.gz"
        );
        assert_eq!(
            meta.report_path(ValidationMode::Instance, now()),
            "/us-dev-1/us-dev-1a/metal3-1/device-1-20240104103015"
        );
    }

    #[test]
    fn test_group_meta() {
        let config = test_config();
        let host = host_with_labels("device-1", "metal3-1", &[(labels::CLUSTER_GROUP_ID, "cg-1")]);
        let meta = TaskMeta::new("bm-icp-gaudi2", &config, &host);

        assert_eq!(meta.cluster_group_id.as_deref(), Some("cg-1"));
        assert_eq!(meta.instance_artifact, "/validation-0.0.3.tar.gz");
        assert_eq!(meta.cluster_artifact, "/validation-1.0.0.tar.gz");
        assert_eq!(meta.repo_path(ValidationMode::Group), "bm-icp-gaudi2/cluster");
        assert_eq!(
            meta.cache_path(Path::new("/tmp/"), ValidationMode::Group),
            PathBuf::from("/tmp/bm-icp-gaudi2/cluster/validation-1.0.0.tar.gz")
        );
        assert!(meta.report_path(ValidationMode::Group, now()).ends_with("-20240104103015-group"));

        let env = meta.task_env(ValidationMode::Group, &TaskCredentials::default(), &Version::default(), now());
        assert_eq!(env.get("clusterGroupId").map(String::as_str), Some("cg-1"));
        assert_eq!(env.get("bmhName").map(String::as_str), Some("device-1"));
    }

    #[test]
    fn test_cluster_id_ignored_when_group_disabled() {
        let config = test_config();
        let host = host_with_labels("device-1", "metal3-1", &[(labels::CLUSTER_GROUP_ID, "cg-1")]);
        let meta = TaskMeta::new("bm-spr", &config, &host);
        assert!(!meta.is_cluster());
        let env = meta.task_env(ValidationMode::Instance, &TaskCredentials::default(), &Version::default(), now());
        assert!(!env.contains_key("clusterGroupId"));
    }

    #[test]
    fn test_render_env_quotes_values() {
        let env = BTreeMap::from([
            ("A".to_string(), "x y".to_string()),
            ("B".to_string(), "it's".to_string()),
        ]);
        assert_eq!(render_env(&env), r"A='x y' B='it'\''s' ");
    }
}
