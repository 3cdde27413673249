//! Validation state machine
//!
//! Each reconcile re-reads the host, classifies its labels and performs at
//! most one step of the pipeline. Waiting is expressed as a requeue delay,
//! never as an in-process sleep, and every label write goes through
//! [`HostStore::apply_labels`].
//!
//! The steps are grouped by phase:
//! - `begin`: instance (or instance group) creation
//! - `initialize`: imaging checks and task launch
//! - `verify`: task completion, group fan-out and cleanup
//! - `group`: cluster-mate queries shared by the group steps

mod begin;
mod group;
mod initialize;
pub mod instance;
pub mod inventory;
mod verify;


use crate::backoff::HostBackoff;
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::events::{actions, reasons, EventPublisher};
use crate::firmware::{desired_firmware, is_timed_out, select_latest_image, Version};
use crate::metrics::Metrics;
use crate::state::{classify, ValidationState};
use crate::store::HostStore;
use crate::task_meta::TaskMeta;
use crate::transitions::{Transition, GROUP_VALIDATION_FAILED, INSTANCE_VALIDATION_FAILED};
use crate::validator::ValidatorFactory;
use chrono::{DateTime, Utc};
use compute_client::{ComputeApi, ImageCatalog};
use crds::{labels, BareMetalHost, Instance};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use netbox_client::NetBoxClientTrait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll interval while waiting for a host to become available.
pub const START_INTERVAL: Duration = Duration::from_secs(10);
/// Poll interval for imaging and task status.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const RETRY_AFTER_ERROR: Duration = Duration::from_secs(10);
/// Retry after a label update that kept conflicting.
pub const RETRY_AFTER_CONFLICT: Duration = Duration::from_secs(1);
/// Retry of a firmware check while the host is being validated.
pub const FIRMWARE_RETRY: Duration = Duration::from_secs(60);
/// A metal3 operation pending this long fails the validation.
pub const STUCK_OPERATION_MINUTES: i64 = 180;

/// Failure reason when no image supports the desired firmware.
pub const IMAGE_NOT_FOUND: &str = "ImageMatchingFwNotFound";
/// Failure reason when the validation archive cannot be fetched.
pub const ARTIFACT_NOT_FOUND: &str = "validationArtifactNotFound";
/// Failure reason when the validation instance ended in the Failed phase.
pub const INSTANCE_CREATION_FAILED: &str = "Instance.creation.failed";

/// Where a reconcile request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Host watch event
    Host,
    /// Firmware map change or startup firmware sweep
    Firmware,
}

/// Result of one reconcile step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do until the host changes
    Done,
    Requeue(Duration),
}

impl Outcome {
    /// Run the next step right away.
    #[must_use]
    pub fn immediately() -> Self {
        Self::Requeue(Duration::ZERO)
    }
}

impl From<Outcome> for Action {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Done => Action::await_change(),
            Outcome::Requeue(delay) => Action::requeue(delay),
        }
    }
}

/// Collaborators of the reconciler.
pub struct Services {
    pub store: Arc<dyn HostStore>,
    pub compute: Arc<dyn ComputeApi>,
    pub images: Arc<dyn ImageCatalog>,
    pub validators: Arc<dyn ValidatorFactory>,
    pub netbox: Arc<dyn NetBoxClientTrait>,
    pub events: Arc<dyn EventPublisher>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("netbox", &self.netbox.base_url())
            .finish_non_exhaustive()
    }
}

/// Drives BareMetalHosts through validation.
#[derive(Debug)]
pub struct Reconciler {
    config: Arc<OperatorConfig>,
    services: Services,
    metrics: Arc<Metrics>,
    backoff: HostBackoff,
    /// Serializes host-watch and firmware reconciles of the same host.
    /// Entries live only while a reconcile holds or waits on them.
    host_locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

/// Snapshot of the host being reconciled.
#[derive(Debug)]
struct HostContext {
    host: BareMetalHost,
    name: String,
    namespace: String,
    instance_type: String,
    /// Host has a cluster group id and its type is validated as a group
    group_enabled: bool,
}

impl HostContext {
    fn new(host: BareMetalHost, instance_type: String, config: &OperatorConfig) -> Self {
        let group_enabled = host.label(labels::CLUSTER_GROUP_ID).is_some_and(|id| !id.is_empty())
            && config.is_group_validation_enabled(&instance_type);
        Self {
            name: host.name_any(),
            namespace: host.namespace().unwrap_or_default(),
            host,
            instance_type,
            group_enabled,
        }
    }

    fn cluster_group_id(&self) -> Result<&str, ControllerError> {
        self.host
            .label(labels::CLUSTER_GROUP_ID)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ControllerError::non_retryable(format!("host {} has no cluster group id", self.name)))
    }

    fn validation_id(&self) -> Result<&str, ControllerError> {
        self.host
            .label(labels::VALIDATION_ID)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ControllerError::non_retryable(format!("host {} has no validation id", self.name)))
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(config: Arc<OperatorConfig>, services: Services, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            services,
            metrics,
            backoff: HostBackoff::default(),
            host_locks: Mutex::default(),
        }
    }

    /// Delay before retrying a host whose reconcile failed.
    pub fn backoff_delay(&self, namespace: &str, name: &str) -> Duration {
        self.metrics.observe_error();
        self.backoff.on_error(&format!("{namespace}/{name}"))
    }

    /// Forget the failure history of a host after a successful reconcile.
    pub fn reset_backoff(&self, namespace: &str, name: &str) {
        self.backoff.on_success(&format!("{namespace}/{name}"));
    }

    /// Run one step for the host `namespace/name`.
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        trigger: Trigger,
    ) -> Result<Outcome, ControllerError> {
        let lock = self.host_lock(namespace, name);
        let _guard = lock.lock().await;
        match self.reconcile_host(namespace, name, trigger).await {
            Err(ControllerError::Conflict(target)) => {
                warn!(host = %name, namespace, %target, "Label update kept conflicting, retrying shortly");
                Ok(Outcome::Requeue(RETRY_AFTER_CONFLICT))
            }
            other => other,
        }
    }

    fn host_lock(&self, namespace: &str, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.host_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let key = format!("{namespace}/{name}");
        if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(key, Arc::downgrade(&lock));
        lock
    }

    async fn reconcile_host(
        &self,
        namespace: &str,
        name: &str,
        trigger: Trigger,
    ) -> Result<Outcome, ControllerError> {
        let Some(host) = self.services.store.get_host(namespace, name).await? else {
            debug!(host = %name, namespace, "Host not found, ignoring");
            return Ok(Outcome::Done);
        };
        let Some(instance_type) = host.instance_types().first().map(ToString::to_string) else {
            debug!(host = %name, namespace, "Host has no instance type, ignoring");
            return Ok(Outcome::Done);
        };
        let ctx = HostContext::new(host, instance_type, &self.config);

        if !self.config.is_instance_type_enabled(&ctx.instance_type) {
            debug!(host = %name, instance_type = %ctx.instance_type, "Validation is not enabled for instance type");
            self.apply(&ctx.host, &[Transition::ValidationComplete { failed: false }])
                .await?;
            return Ok(Outcome::Done);
        }

        if trigger == Trigger::Firmware && self.config.feature_flags.enable_firmware_upgrade {
            if let Some(outcome) = self.check_firmware(&ctx).await? {
                return Ok(outcome);
            }
        }

        if ctx.host.has_label(labels::SKIP_VALIDATION) && !ctx.host.has_label(labels::FW_UPDATE_TRIGGER) {
            info!(host = %name, "Skip validation label present, completing validation");
            self.apply(&ctx.host, &[Transition::ValidationComplete { failed: false }])
                .await?;
            return Ok(Outcome::Done);
        }

        let state = classify(ctx.host.labels(), ctx.group_enabled);
        self.metrics.observe_state(state);
        info!(host = %name, namespace, %state, "Reconciling host");
        debug!(host = %name, labels = ?ctx.host.labels(), "Host labels");

        match state {
            ValidationState::Begin => self.begin(&ctx).await,
            ValidationState::BeginInstanceGroup => self.begin_instance_group(&ctx).await,
            ValidationState::Initializing => self.initializing(&ctx).await,
            ValidationState::Initialized => self.initialized(&ctx).await,
            ValidationState::InitializingInstanceGroup | ValidationState::InitializedInstanceGroup => {
                self.initializing_instance_group(&ctx).await
            }
            ValidationState::Verifying => self.verifying(&ctx).await,
            ValidationState::VerifyingInstanceGroup => self.verifying_instance_group(&ctx).await,
            ValidationState::Verified => self.verified(&ctx).await,
            ValidationState::NotRequired => {
                debug!(host = %name, "Validation not required or already completed");
                Ok(Outcome::Done)
            }
        }
    }

    /// Re-enroll the host when its firmware label does not match the desired build.
    async fn check_firmware(&self, ctx: &HostContext) -> Result<Option<Outcome>, ControllerError> {
        if ctx.host.is_owned_by(&self.config.cloud_account_id) {
            info!(host = %ctx.name, "Validation is in progress, retrying firmware upgrade later");
            return Ok(Some(Outcome::Requeue(FIRMWARE_RETRY)));
        }
        let desired = self.desired_firmware(ctx).await?;
        let current = ctx.host.label(labels::FW_VERSION).unwrap_or_default().to_string();
        if current.contains(&desired.build_version) {
            debug!(host = %ctx.name, firmware = %current, "Host already has the desired firmware");
            return Ok(None);
        }

        let host = self.apply(&ctx.host, &[Transition::TriggerFwUpgrade]).await?;
        info!(host = %ctx.name, from = %current, to = %desired.build_version, "Validation triggered for firmware upgrade");
        self.event(
            &host,
            EventType::Normal,
            reasons::TRIGGER_FW_UPGRADE,
            actions::FIRMWARE_UPGRADE,
            format!("Firmware upgrade to {} from {}", desired.build_version, current),
        )
        .await;
        Ok(Some(Outcome::Done))
    }

    /// Apply `transitions` to `host` and return the updated host.
    async fn apply(
        &self,
        host: &BareMetalHost,
        transitions: &[Transition],
    ) -> Result<BareMetalHost, ControllerError> {
        let updated = self
            .services
            .store
            .apply_labels(&host.namespace().unwrap_or_default(), &host.name_any(), transitions)
            .await?;
        for reason in transitions.iter().filter_map(failure_reason) {
            self.metrics.observe_failure(reason);
        }
        Ok(updated)
    }

    async fn event(
        &self,
        host: &BareMetalHost,
        type_: EventType,
        reason: &str,
        action: &str,
        note: impl Into<String>,
    ) {
        self.services
            .events
            .publish(&host.object_ref(&()), type_, reason, action, Some(note.into()))
            .await;
    }

    /// Apply a terminal failure and report the recorded reason as a warning event.
    async fn stop_with_error(
        &self,
        host: &BareMetalHost,
        transitions: &[Transition],
        reason: &str,
        action: &str,
    ) -> Result<Outcome, ControllerError> {
        let host = self.apply(host, transitions).await?;
        let observed = host.label(labels::CHECKING_FAILED).unwrap_or_default();
        self.event(&host, EventType::Warning, reason, action, format!("Error observed {observed}"))
            .await;
        Ok(Outcome::Done)
    }

    /// Transitions failing the validation of `ctx` with `reason`.
    fn failure(ctx: &HostContext, reason: &str) -> Vec<Transition> {
        let completed = if ctx.group_enabled {
            Transition::GroupVerificationCompleted {
                failed: true,
                reason: Some(reason.to_string()),
            }
        } else {
            Transition::VerificationCompleted {
                failed: true,
                reason: Some(reason.to_string()),
                group_pending: false,
            }
        };
        vec![completed, Transition::MarkForDeletion]
    }

    fn task_meta(&self, ctx: &HostContext) -> TaskMeta {
        TaskMeta::new(&ctx.instance_type, &self.config, &ctx.host)
    }

    async fn desired_firmware(&self, ctx: &HostContext) -> Result<Version, ControllerError> {
        let map = self.services.store.firmware_map(&ctx.namespace).await?;
        Ok(desired_firmware(map.as_ref(), &ctx.instance_type))
    }

    /// Newest image of the host's instance type supporting the desired firmware.
    async fn latest_image(&self, ctx: &HostContext) -> Result<String, ControllerError> {
        let desired = self.desired_firmware(ctx).await?;
        let images = self.services.images.search(&ctx.instance_type).await?;
        let image = select_latest_image(&images, &desired, &self.config.image_version_delimiter)?;
        info!(
            host = %ctx.name,
            instance_type = %ctx.instance_type,
            image = %image,
            build_version = %desired.build_version,
            "Image found for instance type"
        );
        Ok(image)
    }

    /// Instance consuming `host`, if the operator created it.
    async fn find_instance(&self, host: &BareMetalHost) -> Result<Option<Instance>, ControllerError> {
        let Some(consumer) = host.spec.consumer_ref.as_ref() else {
            return Ok(None);
        };
        if consumer.namespace != self.config.cloud_account_id {
            return Ok(None);
        }
        self.services
            .store
            .get_instance(&consumer.namespace, &consumer.name)
            .await
    }

    async fn require_instance(&self, host: &BareMetalHost) -> Result<Instance, ControllerError> {
        self.find_instance(host).await?.ok_or_else(|| {
            ControllerError::retryable(format!("no validation instance found for host {}", host.name_any()))
        })
    }
}

/// Failure reason recorded by a transition, if it fails the host.
fn failure_reason(transition: &Transition) -> Option<&str> {
    match transition {
        Transition::VerificationCompleted {
            failed: true, reason, ..
        } => Some(reason.as_deref().unwrap_or(INSTANCE_VALIDATION_FAILED)),
        Transition::GroupVerificationCompleted { failed: true, reason } => {
            Some(reason.as_deref().unwrap_or(GROUP_VALIDATION_FAILED))
        }
        _ => None,
    }
}

/// The metal3 operation that has been pending for too long, if any.
fn stuck_operation(host: &BareMetalHost, now: DateTime<Utc>) -> Option<&'static str> {
    let history = host.operation_history();
    [("deprovision", history.deprovision), ("provision", history.provision)]
        .into_iter()
        .find_map(|(operation, metric)| {
            metric
                .pending_since()
                .filter(|start| is_timed_out(*start, now, STUCK_OPERATION_MINUTES))
                .map(|_| operation)
        })
}

/// Label reason for a timed out metal3 operation.
fn timeout_reason(operation: &str) -> String {
    format!("Timeout.waiting.for.{operation}.to.complete")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::host_with_labels;
    use chrono::Duration as ChronoDuration;
    use crds::{BareMetalHostStatus, OperationHistory, OperationMetric};

    fn host_with_history(history: OperationHistory) -> BareMetalHost {
        let mut host = host_with_labels("device-1", "metal3-1", &[]);
        host.status = Some(BareMetalHostStatus {
            operation_history: history,
            ..Default::default()
        });
        host
    }

    #[test]
    fn test_stuck_operation() {
        let now = Utc::now();
        let pending = |minutes| OperationMetric {
            start: Some(now - ChronoDuration::minutes(minutes)),
            end: None,
        };

        let host = host_with_history(OperationHistory {
            deprovision: pending(181),
            ..Default::default()
        });
        assert_eq!(stuck_operation(&host, now), Some("deprovision"));

        let host = host_with_history(OperationHistory {
            deprovision: pending(10),
            provision: pending(200),
            ..Default::default()
        });
        assert_eq!(stuck_operation(&host, now), Some("provision"));

        let host = host_with_history(OperationHistory {
            provision: OperationMetric {
                start: Some(now - ChronoDuration::minutes(500)),
                end: Some(now - ChronoDuration::minutes(400)),
            },
            ..Default::default()
        });
        assert_eq!(stuck_operation(&host, now), None);
        assert_eq!(stuck_operation(&host_with_labels("device-2", "metal3-1", &[]), now), None);
    }

    #[test]
    fn test_timeout_reason() {
        assert_eq!(timeout_reason("deprovision"), "Timeout.waiting.for.deprovision.to.complete");
    }

    #[test]
    fn test_failure_reason() {
        assert_eq!(
            failure_reason(&Transition::VerificationCompleted {
                failed: true,
                reason: None,
                group_pending: false,
            }),
            Some(INSTANCE_VALIDATION_FAILED)
        );
        assert_eq!(
            failure_reason(&Transition::GroupVerificationCompleted {
                failed: true,
                reason: Some(IMAGE_NOT_FOUND.to_string()),
            }),
            Some(IMAGE_NOT_FOUND)
        );
        assert_eq!(failure_reason(&Transition::MarkForDeletion), None);
    }

    #[test]
    fn test_outcome_to_action() {
        assert_eq!(Action::from(Outcome::Done), Action::await_change());
        assert_eq!(
            Action::from(Outcome::Requeue(CHECK_INTERVAL)),
            Action::requeue(CHECK_INTERVAL)
        );
    }
}
