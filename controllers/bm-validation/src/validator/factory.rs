//! Validator construction
//!
//! A validator needs the validation archives cached locally and an SSH
//! session to the instance, opened through the instance's bastion.

use super::{ArtifactCache, GroupMembers, Validator, ValidatorSettings};
use crate::config::{read_secret, OperatorConfig};
use crate::error::ControllerError;
use crate::task_meta::{TaskCredentials, TaskMeta, ValidationMode};
use async_trait::async_trait;
use crds::Instance;
use kube::ResourceExt;
use ssh_client::{SshClient, SshTarget};
use std::path::Path;
use tracing::{error, info};

const INSTANCE_SSH_PORT: u16 = 22;

/// Builds validators for instances.
#[async_trait]
pub trait ValidatorFactory: Send + Sync {
    /// Connect to `instance` and prepare the archives `meta` needs.
    ///
    /// A missing or uncachable archive is non-retryable; SSH failures are not classified.
    async fn create(
        &self,
        instance: &Instance,
        meta: TaskMeta,
        members: Option<GroupMembers>,
    ) -> Result<Validator, ControllerError>;
}

#[derive(Debug, Clone)]
pub struct SshValidatorFactory {
    ssh: SshClient,
    cache: ArtifactCache,
    settings: ValidatorSettings,
    repository_url: String,
}

impl SshValidatorFactory {
    /// Load the SSH key and task credentials named by `config`.
    pub async fn from_config(config: &OperatorConfig) -> Result<Self, ControllerError> {
        let ssh = SshClient::from_key_file(&config.ssh_config.private_key_file_path)?;
        let s3 = &config.validation_report_s3_config;
        let credentials = TaskCredentials {
            s3_access_key: optional_secret(&s3.s3_access_key_file_path).await?,
            s3_secret_key: optional_secret(&s3.s3_secret_access_key_file_path).await?,
            hugging_face_token: optional_secret(&config.env_configuration.hugging_face_token_file_path).await?,
            bucket: s3.bucket_name.clone(),
            https_proxy: s3.https_proxy.clone(),
        };
        Ok(Self {
            ssh,
            cache: ArtifactCache::new()?,
            settings: ValidatorSettings {
                credentials,
                wrapper_script: config.wrapper_script_path.clone(),
                cache_base: config.cache_base_path.clone(),
            },
            repository_url: config.validation_task_repository_url.clone(),
        })
    }

    async fn cache_archive(&self, meta: &TaskMeta, mode: ValidationMode) -> Result<(), ControllerError> {
        let url = meta.repository_url(&self.repository_url, mode);
        let target = meta.cache_path(&self.settings.cache_base, mode);
        self.cache
            .ensure(&url, &target)
            .await
            .map_err(|e| cache_failure(&meta.instance_type, mode, e))
    }
}

/// Any failure to cache an archive, an unreachable repository included, is permanent.
fn cache_failure(instance_type: &str, mode: ValidationMode, err: ControllerError) -> ControllerError {
    error!(instance_type, ?mode, error = %err, "Failed to cache validation archive");
    if err.is_non_retryable() {
        return err.context(format!("caching the {mode:?} validation archive"));
    }
    ControllerError::non_retryable(format!(
        "failed to cache the {mode:?} validation archive for instance type {instance_type}: {err}"
    ))
}

async fn optional_secret(path: &Path) -> Result<String, ControllerError> {
    if path.as_os_str().is_empty() {
        Ok(String::new())
    } else {
        read_secret(path).await
    }
}

#[async_trait]
impl ValidatorFactory for SshValidatorFactory {
    async fn create(
        &self,
        instance: &Instance,
        meta: TaskMeta,
        members: Option<GroupMembers>,
    ) -> Result<Validator, ControllerError> {
        let ip = instance
            .primary_address()
            .ok_or_else(|| ControllerError::retryable(format!("instance {} has no address yet", instance.name_any())))?
            .to_string();
        let status = instance.status.clone().unwrap_or_default();

        if meta.is_cluster() {
            self.cache_archive(&meta, ValidationMode::Group).await?;
        }
        self.cache_archive(&meta, ValidationMode::Instance).await?;

        let proxy = &status.ssh_proxy;
        let bastion = self
            .ssh
            .dial_bastion(&SshTarget::new(&proxy.proxy_address, proxy.proxy_port, &proxy.proxy_user))
            .await?;
        let session = bastion
            .dial_through(&SshTarget::new(&ip, INSTANCE_SSH_PORT, &status.user_name))
            .await?;
        info!(host = %meta.host_name, ip = %ip, "Connected to validation instance");

        Ok(Validator::new(Box::new(session), ip, meta, self.settings.clone(), members))
    }
}
