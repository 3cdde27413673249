//! Validation label vocabulary
//!
//! The label map of a `BareMetalHost` is the durable record of validation progress.
//! Flags are present with the value `"true"`; a few labels carry free text
//! (validation id, cluster id, firmware version, failure reason).

/// Host is enrolled for validation.
pub const READY_TO_TEST: &str = "cloud.intel.com/ready-to-test";
/// Validation finished successfully.
pub const VERIFIED: &str = "cloud.intel.com/verified";
/// Validation failed; the value is a machine-readable reason.
pub const CHECKING_FAILED: &str = "cloud.intel.com/validation-check-failed";
/// Instance provisioning for validation is in progress.
pub const IMAGING: &str = "cloud.intel.com/validation-imaging";
/// Instance provisioning for validation completed.
pub const IMAGING_COMPLETED: &str = "cloud.intel.com/validation-imaging-completed";
/// Instance-level validation passed, waiting for the group task.
pub const INSTANCE_VALIDATION_COMPLETED: &str = "cloud.intel.com/validation-instance-completed";
/// Instance validation task is running.
pub const CHECKING: &str = "cloud.intel.com/validation-checking";
/// Group validation task is running (set on the master only).
pub const CHECKING_GROUP: &str = "cloud.intel.com/group-validation-checking";
/// Validation task (instance or group) completed.
pub const CHECKING_COMPLETED: &str = "cloud.intel.com/validation-checking-completed";
/// Group validation task completed.
pub const CHECKING_COMPLETED_GROUP: &str = "cloud.intel.com/validation-checking-completed-group";
/// Instance backing the validation must be deprovisioned.
pub const DELETION: &str = "cloud.intel.com/deletion-for-validation";
/// Host drives group-level validation for its validation id.
pub const MASTER_NODE: &str = "cloud.intel.com/validation-master-node";
/// Election claim written on the anchor host of a validation round; value is the winner's name.
pub const MASTER_CLAIM: &str = "cloud.intel.com/validation-master-claim";
/// Group validation is held until this label is removed.
pub const GATE_VALIDATION: &str = "cloud.intel.com/validation-gating";
/// Identifier of the group validation round.
pub const VALIDATION_ID: &str = "cloud.intel.com/validation-id";
/// Cluster group the host belongs to.
pub const CLUSTER_GROUP_ID: &str = "cloud.intel.com/instance-group-id";
/// Validation is not required for this host.
pub const SKIP_VALIDATION: &str = "cloud.intel.com/skip-validation";
/// Only instance-level validation should run.
pub const SKIP_GROUP_VALIDATION: &str = "cloud.intel.com/skip-group-validation";
/// Keep the validation instance after the task completes.
pub const SKIP_DEPROVISION: &str = "cloud.intel.com/skip-deprovisioning";
/// Validation was re-triggered because of a firmware change.
pub const FW_UPDATE_TRIGGER: &str = "cloud.intel.com/fw-update-trigger";
/// Firmware build version installed by the last validation.
pub const FW_VERSION: &str = "cloud.intel.com/firmware-version";
/// Free-text test configuration forwarded to the validation task.
pub const TEST_CONFIGURATION: &str = "cloud.intel.com/validation-test-configuration";
/// Network mode requested for the validation instance.
pub const NETWORK_MODE: &str = "cloud.intel.com/network-mode";

/// Prefix of the `instance-type.cloud.intel.com/<type>=true` label.
pub const INSTANCE_TYPE_PREFIX: &str = "instance-type.cloud.intel.com/";

/// Network mode value that is rewritten before instance creation.
pub const NETWORK_MODE_XBX: &str = "XBX";
/// Network mode sent instead of `XBX` so no accelerator vnet is created.
pub const NETWORK_MODE_IGNORE_XBX: &str = "IGNORE_XBX";

/// Value used for boolean flags.
pub const TRUE: &str = "true";

/// Builds the instance-type label key for `instance_type`.
#[must_use]
pub fn instance_type_label(instance_type: &str) -> String {
    format!("{INSTANCE_TYPE_PREFIX}{instance_type}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_type_label() {
        assert_eq!(
            instance_type_label("bm-icp-gaudi2"),
            "instance-type.cloud.intel.com/bm-icp-gaudi2"
        );
    }
}
