//! Initializing, Initialized and InitializingInstanceGroup: wait for imaging,
//! then launch the validation task.

use super::group::InitializedGroup;
use super::{
    inventory, HostContext, Outcome, Reconciler, ARTIFACT_NOT_FOUND, CHECK_INTERVAL, INSTANCE_CREATION_FAILED,
    RETRY_AFTER_ERROR,
};
use crate::error::ControllerError;
use crate::events::{actions, reasons};
use crate::task_meta::ValidationMode;
use crate::transitions::Transition;
use crate::validator::Validator;
use crds::{labels, InstancePhase, ProvisioningState};
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

impl Reconciler {
    pub(super) async fn initializing(&self, ctx: &HostContext) -> Result<Outcome, ControllerError> {
        if ctx.host.provisioning_state() != ProvisioningState::Provisioned {
            debug!(host = %ctx.name, state = ?ctx.host.provisioning_state(), "Instance is being provisioned");
            return Ok(Outcome::Requeue(CHECK_INTERVAL));
        }
        let instance = match self.require_instance(&ctx.host).await {
            Ok(instance) => instance,
            Err(e) => {
                error!(host = %ctx.name, error = %e, "Failed to get instance during initialization");
                return Ok(Outcome::Requeue(RETRY_AFTER_ERROR));
            }
        };

        let phase = instance.phase();
        info!(host = %ctx.name, instance = %instance.name_any(), ?phase, "Instance has been provisioned");
        let transitions = match phase {
            InstancePhase::Failed => vec![Transition::VerificationCompleted {
                failed: true,
                reason: Some(INSTANCE_CREATION_FAILED.to_string()),
                group_pending: false,
            }],
            InstancePhase::Ready => {
                let mut transitions = vec![Transition::ImagingCompleted];
                match self.desired_firmware(ctx).await {
                    Ok(firmware) => transitions.push(Transition::RecordFirmware(firmware.build_version)),
                    Err(e) => {
                        error!(host = %ctx.name, image = %instance.spec.machine_image, error = %e, "Failed to get desired firmware version");
                    }
                }
                transitions
            }
            _ => {
                debug!(host = %ctx.name, instance = %instance.name_any(), ?phase, "Instance is not yet ready");
                return Ok(Outcome::Requeue(CHECK_INTERVAL));
            }
        };

        let host = self.apply(&ctx.host, &transitions).await?;
        if let Err(e) = inventory::validation_in_progress(self.services.netbox.as_ref(), &ctx.name).await {
            error!(host = %ctx.name, error = %e, "Failed to update NetBox with validation in progress");
        }
        if phase == InstancePhase::Failed {
            self.event(
                &host,
                EventType::Warning,
                reasons::IMAGING_FAILED,
                actions::IMAGING,
                "ImagingFailed, marking verification as failed",
            )
            .await;
        } else {
            self.event(
                &host,
                EventType::Normal,
                reasons::IMAGING_COMPLETE,
                actions::IMAGING,
                "Imaging has been completed and instance is in Ready phase",
            )
            .await;
        }
        Ok(Outcome::immediately())
    }

    pub(super) async fn initialized(&self, ctx: &HostContext) -> Result<Outcome, ControllerError> {
        let instance = match self.require_instance(&ctx.host).await {
            Ok(instance) => instance,
            Err(e) => {
                error!(host = %ctx.name, error = %e, "Failed to get instance before triggering validation task");
                return Ok(Outcome::Requeue(RETRY_AFTER_ERROR));
            }
        };
        let validator = match self.services.validators.create(&instance, self.task_meta(ctx), None).await {
            Ok(validator) => validator,
            Err(e) if e.is_non_retryable() => {
                error!(host = %ctx.name, error = %e, "Validation artifact not available");
                return self
                    .stop_with_error(
                        &ctx.host,
                        &Self::failure(ctx, ARTIFACT_NOT_FOUND),
                        reasons::INSTANCE_VALIDATION_ERROR,
                        actions::VALIDATING,
                    )
                    .await;
            }
            Err(e) => return Err(e.context("creating validator")),
        };

        let started = self.start_task(ctx, &validator, ValidationMode::Instance).await;
        validator.close().await;
        let already_started = started?;

        let host = self.apply(&ctx.host, &[Transition::VerificationStarted]).await?;
        if !already_started {
            let artifact = self.task_meta(ctx).instance_artifact;
            self.event(
                &host,
                EventType::Normal,
                reasons::INSTANCE_VALIDATION_TASK_STARTED,
                actions::VALIDATING,
                format!("Validation task has started with {artifact}"),
            )
            .await;
        }
        Ok(Outcome::Requeue(CHECK_INTERVAL))
    }

    /// Shared by InitializingInstanceGroup and InitializedInstanceGroup: the
    /// master launches the group task once the whole round passed instance validation.
    pub(super) async fn initializing_instance_group(&self, ctx: &HostContext) -> Result<Outcome, ControllerError> {
        if !ctx.host.has_label(labels::MASTER_NODE) {
            debug!(host = %ctx.name, "Not the master of the validation round, waiting for the group task");
            return Ok(Outcome::Done);
        }
        let group = match self.initialized_group(ctx).await {
            Ok(Some(group)) => group,
            Ok(None) => return Ok(Outcome::Requeue(RETRY_AFTER_ERROR)),
            Err(e) => {
                warn!(host = %ctx.name, error = %e, "Instance group is not initialized yet");
                return Ok(Outcome::Requeue(RETRY_AFTER_ERROR));
            }
        };
        let InitializedGroup { master, members } = group;
        info!(host = %ctx.name, members = %members.names.join(","), "Instance group initialized");

        let validator = match self
            .services
            .validators
            .create(&master, self.task_meta(ctx), Some(members))
            .await
        {
            Ok(validator) => validator,
            Err(e) if e.is_non_retryable() => {
                error!(host = %ctx.name, error = %e, "Group validation artifact not available");
                return self
                    .stop_with_error(
                        &ctx.host,
                        &Self::failure(ctx, ARTIFACT_NOT_FOUND),
                        reasons::GROUP_VALIDATION_ERROR,
                        actions::VALIDATING,
                    )
                    .await;
            }
            Err(e) => return Err(e.context("creating group validator")),
        };

        let started = self.start_task(ctx, &validator, ValidationMode::Group).await;
        validator.close().await;
        let already_started = started?;

        let host = self.apply(&ctx.host, &[Transition::GroupVerificationStarted]).await?;
        if !already_started {
            let artifact = self.task_meta(ctx).cluster_artifact;
            self.event(
                &host,
                EventType::Normal,
                reasons::GROUP_VALIDATION_TASK_STARTED,
                actions::VALIDATING,
                format!("GroupValidation task has started with {artifact}"),
            )
            .await;
        }
        Ok(Outcome::Requeue(CHECK_INTERVAL))
    }

    /// Launch the task for `mode`. Returns true when it was already running.
    async fn start_task(
        &self,
        ctx: &HostContext,
        validator: &Validator,
        mode: ValidationMode,
    ) -> Result<bool, ControllerError> {
        let firmware = self.desired_firmware(ctx).await?;
        match mode {
            ValidationMode::Instance => validator.start_instance_task(&firmware).await,
            ValidationMode::Group => validator.start_group_task(&firmware).await,
        }
    }
}
