//! Kubernetes Events on BareMetalHosts
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! the reconcile that emitted it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Events about a host.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event on `resource_ref`.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventPublisher").finish_non_exhaustive()
    }
}

impl KubeEventPublisher {
    /// `controller_name` is reported as the event's reporting component.
    #[must_use]
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`.
pub mod reasons {
    pub const IMAGING_STARTED: &str = "ImagingStarted";
    pub const INSTANCE_GROUP_IMAGING: &str = "InstanceGroupImaging";
    pub const IMAGING_COMPLETE: &str = "ImagingComplete";
    pub const IMAGING_FAILED: &str = "ImagingFailed";
    pub const INSTANCE_VALIDATION_TASK_STARTED: &str = "InstanceValidationTaskStarted";
    pub const GROUP_VALIDATION_TASK_STARTED: &str = "GroupValidationTaskStarted";
    pub const INSTANCE_VALIDATION_TASK_COMPLETED: &str = "InstanceValidationTaskCompleted";
    pub const INSTANCE_VALIDATION_TASK_FAILED: &str = "InstanceValidationTaskFailed";
    pub const GROUP_VALIDATION_TASK_COMPLETED: &str = "GroupValidationTaskCompleted";
    pub const GROUP_VALIDATION_TASK_FAILED: &str = "GroupValidationTaskFailed";
    /// Instance validation stopped on a permanent error
    pub const INSTANCE_VALIDATION_ERROR: &str = "InstanceValidationError";
    /// Group validation stopped on a permanent error
    pub const GROUP_VALIDATION_ERROR: &str = "GroupValidationError";
    pub const CLEANUP_TRIGGERED: &str = "CleanupTriggered";
    /// Where the validation report was uploaded
    pub const REPORT_PATH: &str = "ReportPath";
    pub const TRIGGER_FW_UPGRADE: &str = "TriggerFwUpgrade";
}

/// Event actions.
pub mod actions {
    pub const IMAGING: &str = "Imaging";
    pub const VALIDATING: &str = "Validating";
    pub const CLEANUP: &str = "Cleanup";
    pub const FIRMWARE_UPGRADE: &str = "FirmwareUpgrade";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingEventPublisher;

    #[tokio::test]
    async fn test_recording_publisher() {
        let publisher = RecordingEventPublisher::default();
        let reference = ObjectReference {
            name: Some("device-1".to_string()),
            namespace: Some("metal3-1".to_string()),
            ..Default::default()
        };
        publisher
            .publish(
                &reference,
                EventType::Warning,
                reasons::INSTANCE_VALIDATION_ERROR,
                actions::IMAGING,
                Some("Error observed ImageMatchingFwNotFound".to_string()),
            )
            .await;

        assert_eq!(publisher.reasons_for("device-1"), vec![reasons::INSTANCE_VALIDATION_ERROR]);
        assert!(publisher.reasons_for("device-2").is_empty());
    }
}
