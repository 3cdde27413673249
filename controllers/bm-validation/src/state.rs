//! Validation state classifier
//!
//! The labels of a host are the only persisted record of its progress.
//! [`classify`] maps them to a [`ValidationState`]; the most advanced flag
//! wins, so a host never regresses when several flags coexist during a race.

use crds::labels;
use std::collections::BTreeMap;
use std::fmt;

/// Label map of a host
pub type Labels = BTreeMap<String, String>;

/// Logical validation state of a host, recomputed on every reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationState {
    Begin,
    BeginInstanceGroup,
    Initializing,
    InitializingInstanceGroup,
    Initialized,
    /// Never produced by [`classify`]; treated like `InitializingInstanceGroup`.
    InitializedInstanceGroup,
    Verifying,
    VerifyingInstanceGroup,
    Verified,
    NotRequired,
}

impl ValidationState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Begin => "Begin",
            Self::BeginInstanceGroup => "BeginInstanceGroup",
            Self::Initializing => "Initializing",
            Self::InitializingInstanceGroup => "InitializingInstanceGroup",
            Self::Initialized => "Initialized",
            Self::InitializedInstanceGroup => "InitializedInstanceGroup",
            Self::Verifying => "Verifying",
            Self::VerifyingInstanceGroup => "VerifyingInstanceGroup",
            Self::Verified => "Verified",
            Self::NotRequired => "NotRequired",
        }
    }

    /// States in which a host takes part in a group validation round.
    #[must_use]
    pub fn is_group_stage(self) -> bool {
        matches!(
            self,
            Self::InitializingInstanceGroup | Self::InitializedInstanceGroup | Self::VerifyingInstanceGroup
        )
    }
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a label set.
///
/// `group_enabled` is true when the host carries a cluster group id and group
/// validation is enabled for its instance type; it only decides between
/// `Begin` and `BeginInstanceGroup`.
#[must_use]
pub fn classify(host_labels: &Labels, group_enabled: bool) -> ValidationState {
    let has = |key: &str| host_labels.contains_key(key);

    if !has(labels::READY_TO_TEST) {
        return ValidationState::NotRequired;
    }
    if has(labels::CHECKING_COMPLETED) {
        ValidationState::Verified
    } else if has(labels::CHECKING_GROUP) {
        ValidationState::VerifyingInstanceGroup
    } else if has(labels::CHECKING) {
        ValidationState::Verifying
    } else if has(labels::INSTANCE_VALIDATION_COMPLETED) {
        ValidationState::InitializingInstanceGroup
    } else if has(labels::IMAGING_COMPLETED) {
        ValidationState::Initialized
    } else if has(labels::IMAGING) {
        ValidationState::Initializing
    } else if group_enabled {
        ValidationState::BeginInstanceGroup
    } else {
        ValidationState::Begin
    }
}
