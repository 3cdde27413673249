//! Verifying, VerifyingInstanceGroup and Verified: collect task results and
//! release the host.

use super::{inventory, HostContext, Outcome, Reconciler, CHECK_INTERVAL, RETRY_AFTER_ERROR};
use crate::election::{elect_master, round_members};
use crate::error::ControllerError;
use crate::events::{actions, reasons};
use crate::state::{classify, ValidationState};
use crate::transitions::Transition;
use crate::validator::{TaskStatus, Validator};
use crds::{labels, BareMetalHost};
use kube::runtime::events::EventType;
use kube::ResourceExt;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Result metadata key listing the hosts that failed the group task.
pub const FAILED_NODES_KEY: &str = "failedNodes";
/// Result metadata key carrying the task's summary line.
pub const TEST_RESULT_KEY: &str = "testResult";

impl Reconciler {
    pub(super) async fn verifying(&self, ctx: &HostContext) -> Result<Outcome, ControllerError> {
        let instance = match self.require_instance(&ctx.host).await {
            Ok(instance) => instance,
            Err(e) => {
                error!(host = %ctx.name, error = %e, "Failed to get instance while checking validation task status");
                return Ok(Outcome::Requeue(RETRY_AFTER_ERROR));
            }
        };
        let validator = self
            .services
            .validators
            .create(&instance, self.task_meta(ctx), None)
            .await
            .map_err(|e| e.context("creating validator"))?;
        let outcome = self.finish_instance_task(ctx, &validator).await;
        validator.close().await;
        outcome
    }

    async fn finish_instance_task(&self, ctx: &HostContext, validator: &Validator) -> Result<Outcome, ControllerError> {
        let (complete, status) = validator.is_completed().await?;
        if !complete {
            return Ok(Outcome::Requeue(CHECK_INTERVAL));
        }
        info!(host = %ctx.name, %status, "Validation task completed");

        let failed = status == TaskStatus::Failed;
        let mut transitions = Vec::with_capacity(2);
        if failed {
            transitions.push(Transition::VerificationCompleted {
                failed: true,
                reason: None,
                group_pending: false,
            });
        } else {
            let group_round = ctx.group_enabled && !ctx.host.has_label(labels::SKIP_GROUP_VALIDATION);
            if group_round {
                let mates = self
                    .services
                    .store
                    .list_cluster_members(ctx.cluster_group_id()?)
                    .await?;
                if elect_master(self.services.store.as_ref(), &ctx.host, &mates).await? {
                    info!(host = %ctx.name, "Host has been marked as master node for group validation");
                }
            }
            transitions.push(Transition::VerificationCompleted {
                failed: false,
                reason: None,
                group_pending: group_round,
            });
        }
        transitions.push(Transition::MarkForDeletion);
        let host = self.apply(&ctx.host, &transitions).await?;

        if failed {
            self.event(
                &host,
                EventType::Warning,
                reasons::INSTANCE_VALIDATION_TASK_FAILED,
                actions::VALIDATING,
                "Validation task has failed",
            )
            .await;
        } else {
            self.event(
                &host,
                EventType::Normal,
                reasons::INSTANCE_VALIDATION_TASK_COMPLETED,
                actions::VALIDATING,
                "Validation task completed successfully",
            )
            .await;
            validator.clear_test_data().await;
        }
        Ok(Outcome::immediately())
    }

    pub(super) async fn verifying_instance_group(&self, ctx: &HostContext) -> Result<Outcome, ControllerError> {
        let cluster_group_id = ctx.cluster_group_id()?;
        let validation_id = ctx.validation_id()?;
        info!(host = %ctx.name, cluster_group_id, validation_id, "Checking group validation task");

        let instance = match self.require_instance(&ctx.host).await {
            Ok(instance) => instance,
            Err(e) => {
                error!(host = %ctx.name, error = %e, "Failed to get instance while checking group validation task status");
                return Ok(Outcome::Requeue(RETRY_AFTER_ERROR));
            }
        };
        let validator = self
            .services
            .validators
            .create(&instance, self.task_meta(ctx), None)
            .await
            .map_err(|e| e.context("creating validator"))?;
        let outcome = self
            .finish_group_task(ctx, &validator, cluster_group_id, validation_id)
            .await;
        validator.close().await;
        outcome
    }

    async fn finish_group_task(
        &self,
        ctx: &HostContext,
        validator: &Validator,
        cluster_group_id: &str,
        validation_id: &str,
    ) -> Result<Outcome, ControllerError> {
        let (complete, status) = validator.is_completed().await?;
        if !complete {
            return Ok(Outcome::Requeue(CHECK_INTERVAL));
        }
        info!(host = %ctx.name, %status, cluster_group_id, validation_id, "Group validation completed");

        let failed_nodes = match validator.result_meta().await {
            Ok(meta) => failed_nodes(&meta),
            Err(e) => {
                warn!(host = %ctx.name, validation_id, error = %e, "Failed to get the validation result metadata");
                Vec::new()
            }
        };
        if !failed_nodes.is_empty() {
            info!(host = %ctx.name, validation_id, failed = %failed_nodes.join(","), "Hosts failed group validation");
        }

        let mates = self.services.store.list_cluster_members(cluster_group_id).await?;
        for mate in round_members(&mates, validation_id).filter(|m| !m.has_label(labels::MASTER_NODE)) {
            let failed = status == TaskStatus::Failed || failed_nodes.contains(&mate.name_any());
            self.complete_group_member(mate, failed).await?;
        }
        // The master goes last so a conflict on a member is retried from here.
        let failed = status == TaskStatus::Failed || failed_nodes.contains(&ctx.name);
        self.complete_group_member(&ctx.host, failed).await?;
        Ok(Outcome::immediately())
    }

    async fn complete_group_member(&self, host: &BareMetalHost, failed: bool) -> Result<(), ControllerError> {
        if !matches!(
            classify(host.labels(), true),
            ValidationState::InitializingInstanceGroup | ValidationState::VerifyingInstanceGroup
        ) {
            info!(host = %host.name_any(), "Host is not waiting for the group task, skipping");
            return Ok(());
        }
        let host = self
            .apply(host, &[Transition::GroupVerificationCompleted { failed, reason: None }])
            .await?;
        if failed {
            self.event(
                &host,
                EventType::Warning,
                reasons::GROUP_VALIDATION_TASK_FAILED,
                actions::VALIDATING,
                "Group validation task has failed",
            )
            .await;
        } else {
            self.event(
                &host,
                EventType::Normal,
                reasons::GROUP_VALIDATION_TASK_COMPLETED,
                actions::VALIDATING,
                "Group validation task completed successfully",
            )
            .await;
        }
        Ok(())
    }

    pub(super) async fn verified(&self, ctx: &HostContext) -> Result<Outcome, ControllerError> {
        let instance = match self.find_instance(&ctx.host).await {
            Ok(instance) => instance,
            Err(e) => {
                error!(host = %ctx.name, error = %e, "Failed to fetch instance post verification, will retry");
                return Ok(Outcome::Requeue(RETRY_AFTER_ERROR));
            }
        };
        let failed = ctx.host.has_label(labels::CHECKING_FAILED);

        let mut result_meta = None;
        if let Some(instance) = instance {
            if failed && !self.config.feature_flags.de_provision_post_validation_failure {
                info!(host = %ctx.name, "Validation failed, keeping the instance");
            } else {
                match self.services.validators.create(&instance, self.task_meta(ctx), None).await {
                    Ok(validator) => {
                        match validator.result_meta().await {
                            Ok(meta) => result_meta = Some(meta),
                            Err(e) => warn!(host = %ctx.name, error = %e, "Failed to get the validation result metadata"),
                        }
                        validator.close().await;
                    }
                    Err(e) if e.is_non_retryable() => {
                        warn!(host = %ctx.name, error = %e, "Unable to create validator during cleanup");
                    }
                    Err(e) => return Err(e.context("creating validator during cleanup")),
                }

                if ctx.host.has_label(labels::SKIP_DEPROVISION) {
                    info!(host = %ctx.name, instance = %instance.name_any(), "Skipping deprovisioning of host");
                } else {
                    info!(host = %ctx.name, instance = %instance.name_any(), "Deleting validation instance");
                    if let Err(e) = self
                        .services
                        .compute
                        .delete(&self.config.cloud_account_id, &instance.name_any())
                        .await
                    {
                        if !e.is_not_found() {
                            error!(host = %ctx.name, instance = %instance.name_any(), error = %e, "Deleting instance failed");
                            return Ok(Outcome::Requeue(RETRY_AFTER_ERROR));
                        }
                    }
                    self.event(
                        &ctx.host,
                        EventType::Normal,
                        reasons::CLEANUP_TRIGGERED,
                        actions::CLEANUP,
                        "Deprovision the baremetal as part of cleanup",
                    )
                    .await;
                }
            }
        }

        let host = self
            .apply(&ctx.host, &[Transition::ValidationComplete { failed }])
            .await?;
        info!(host = %ctx.name, failed, "Validation completed");

        let Some(meta) = result_meta else {
            info!(host = %ctx.name, "NetBox was not updated since the result metadata is unavailable");
            return Ok(Outcome::Done);
        };
        let bucket = meta.get("bucket").map(String::as_str).unwrap_or_default();
        let upload_path = meta.get("uploadPath").map(String::as_str);
        self.event(
            &host,
            EventType::Normal,
            reasons::REPORT_PATH,
            actions::CLEANUP,
            format!("{bucket}{}", upload_path.unwrap_or_default()),
        )
        .await;
        if let Err(e) = inventory::validation_completed(
            self.services.netbox.as_ref(),
            &ctx.name,
            &self.config.validation_report_s3_config.cloudfront_prefix,
            upload_path,
            !failed,
        )
        .await
        {
            error!(host = %ctx.name, error = %e, "Failed to update NetBox with validation completion status");
        }
        if let Some(result) = meta.get(TEST_RESULT_KEY) {
            info!(host = %ctx.name, test_result = %result, "Validation details");
        }
        Ok(Outcome::Done)
    }
}

/// Hosts listed as failed in the group task's result metadata.
fn failed_nodes(meta: &HashMap<String, String>) -> Vec<String> {
    meta.get(FAILED_NODES_KEY)
        .map(|nodes| {
            nodes
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_nodes() {
        let meta = HashMap::from([(FAILED_NODES_KEY.to_string(), "device-2, device-3,".to_string())]);
        assert_eq!(failed_nodes(&meta), vec!["device-2", "device-3"]);
        assert!(failed_nodes(&HashMap::new()).is_empty());
    }
}
