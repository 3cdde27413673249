//! Begin and BeginInstanceGroup: provision the validation instance(s).

use super::instance::{self, GroupRequest};
use super::{
    stuck_operation, timeout_reason, HostContext, Outcome, Reconciler, CHECK_INTERVAL, IMAGE_NOT_FOUND,
    RETRY_AFTER_ERROR, START_INTERVAL,
};
use crate::error::ControllerError;
use crate::events::{actions, reasons};
use crate::transitions::Transition;
use chrono::Utc;
use crds::{BareMetalHost, ProvisioningState};
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{error, info, warn};

impl Reconciler {
    pub(super) async fn begin(&self, ctx: &HostContext) -> Result<Outcome, ControllerError> {
        if let Some(outcome) = self.fail_if_stuck(ctx, reasons::INSTANCE_VALIDATION_ERROR).await? {
            return Ok(outcome);
        }

        if !ctx.host.is_owned_by(&self.config.cloud_account_id) {
            if ctx.host.provisioning_state() != ProvisioningState::Available {
                info!(host = %ctx.name, state = ?ctx.host.provisioning_state(), "Waiting for host to become available");
                return Ok(Outcome::Requeue(START_INTERVAL));
            }
            match self.create_instance(ctx).await {
                Ok(()) => {}
                Err(e) if e.is_non_retryable() => {
                    error!(host = %ctx.name, error = %e, "Unable to create validation instance");
                    let failed = Transition::VerificationCompleted {
                        failed: true,
                        reason: Some(IMAGE_NOT_FOUND.to_string()),
                        group_pending: false,
                    };
                    return self
                        .stop_with_error(&ctx.host, &[failed], reasons::INSTANCE_VALIDATION_ERROR, actions::IMAGING)
                        .await;
                }
                Err(e) => {
                    warn!(host = %ctx.name, error = %e, "Failed to create validation instance, retrying");
                    return Ok(Outcome::Requeue(START_INTERVAL));
                }
            }
        }

        let host = self
            .apply(&ctx.host, &[Transition::ValidationStarted { validation_id: None }])
            .await?;
        self.event(
            &host,
            EventType::Normal,
            reasons::IMAGING_STARTED,
            actions::IMAGING,
            "Imaging has been triggered as part of validation",
        )
        .await;
        Ok(Outcome::Requeue(CHECK_INTERVAL))
    }

    pub(super) async fn begin_instance_group(&self, ctx: &HostContext) -> Result<Outcome, ControllerError> {
        if let Some(outcome) = self.fail_if_stuck(ctx, reasons::GROUP_VALIDATION_ERROR).await? {
            return Ok(outcome);
        }

        if ctx.host.is_owned_by(&self.config.cloud_account_id) {
            // Instance exists but the host missed its ValidationStarted update.
            let instance = match self.require_instance(&ctx.host).await {
                Ok(instance) => instance,
                Err(e) => {
                    warn!(host = %ctx.name, error = %e, "Validation instance not found yet");
                    return Ok(Outcome::Requeue(RETRY_AFTER_ERROR));
                }
            };
            let validation_id = instance.validation_id().map(ToString::to_string).ok_or_else(|| {
                ControllerError::retryable(format!("instance {} has no instance group", instance.name_any()))
            })?;
            self.apply(
                &ctx.host,
                &[Transition::ValidationStarted {
                    validation_id: Some(validation_id),
                }],
            )
            .await?;
            return Ok(Outcome::Requeue(CHECK_INTERVAL));
        }

        let Some(hosts) = self.available_group(ctx).await? else {
            return Ok(Outcome::Requeue(START_INTERVAL));
        };
        let validation_id = instance::generate_validation_id();
        match self.create_instance_group(ctx, &hosts, &validation_id).await {
            Ok(()) => {}
            Err(e) if e.is_non_retryable() => {
                error!(host = %ctx.name, error = %e, "Unable to create validation instance group");
                let failed = Transition::GroupVerificationCompleted {
                    failed: true,
                    reason: Some(IMAGE_NOT_FOUND.to_string()),
                };
                return self
                    .stop_with_error(&ctx.host, &[failed], reasons::GROUP_VALIDATION_ERROR, actions::IMAGING)
                    .await;
            }
            Err(e) => {
                warn!(host = %ctx.name, error = %e, "Failed to create validation instance group, retrying");
                return Ok(Outcome::Requeue(START_INTERVAL));
            }
        }

        let names: Vec<String> = hosts.iter().map(ResourceExt::name_any).collect();
        for host in &hosts {
            let started = Transition::ValidationStarted {
                validation_id: Some(validation_id.clone()),
            };
            match self.apply(host, &[started]).await {
                Ok(updated) => {
                    self.event(
                        &updated,
                        EventType::Normal,
                        reasons::INSTANCE_GROUP_IMAGING,
                        actions::IMAGING,
                        format!(
                            "Imaging has been triggered as part of group validation {validation_id} with {}",
                            names.join(",")
                        ),
                    )
                    .await;
                }
                Err(e) => {
                    error!(host = %host.name_any(), validation_id = %validation_id, error = %e, "Failed to mark group member as imaging");
                }
            }
        }
        info!(host = %ctx.name, validation_id = %validation_id, hosts = %names.join(","), "Instance group created");
        Ok(Outcome::Requeue(CHECK_INTERVAL))
    }

    /// Fail the validation of a host whose metal3 operation never completed.
    async fn fail_if_stuck(&self, ctx: &HostContext, event_reason: &str) -> Result<Option<Outcome>, ControllerError> {
        let Some(operation) = stuck_operation(&ctx.host, Utc::now()) else {
            return Ok(None);
        };
        let reason = timeout_reason(operation);
        error!(host = %ctx.name, operation, "Host is stuck, failing validation");
        let outcome = self
            .stop_with_error(&ctx.host, &Self::failure(ctx, &reason), event_reason, actions::VALIDATING)
            .await?;
        Ok(Some(outcome))
    }

    async fn create_instance(&self, ctx: &HostContext) -> Result<(), ControllerError> {
        let image = self.latest_image(ctx).await?;
        let request = instance::single_request(&self.config, &ctx.host, &ctx.instance_type, &image);
        let created = self.services.compute.create_multiple(request).await?;
        if created.is_empty() {
            return Err(ControllerError::retryable(format!(
                "no instance created for host {}",
                ctx.name
            )));
        }
        info!(host = %ctx.name, image = %image, "Validation instance created");
        Ok(())
    }

    async fn create_instance_group(
        &self,
        ctx: &HostContext,
        hosts: &[BareMetalHost],
        validation_id: &str,
    ) -> Result<(), ControllerError> {
        let image = self.latest_image(ctx).await?;
        let key_path = &self.config.ssh_config.private_key_file_path;
        let private_key = tokio::fs::read(key_path)
            .await
            .map_err(|e| ControllerError::from(e).context(format!("reading {}", key_path.display())))?;
        let user_data = instance::render_cloud_init(&private_key)?;
        let request = instance::group_request(
            &self.config,
            hosts,
            &GroupRequest {
                instance_type: &ctx.instance_type,
                image: &image,
                cluster_group_id: ctx.cluster_group_id()?,
                validation_id,
                user_data: &user_data,
            },
        );
        let created = self.services.compute.create_multiple(request).await?;
        if created.is_empty() {
            return Err(ControllerError::retryable(format!(
                "no instances created for group validation {validation_id}"
            )));
        }
        Ok(())
    }
}
