//! Label transitions
//!
//! Every label mutation the operator performs is a [`Transition`]. Applying a
//! transition computes a new label map from the current one, so the store can
//! re-apply it on top of a fresher copy after a write conflict.

use crate::state::Labels;
use crds::labels;

/// Default failure reason of an instance validation task.
pub const INSTANCE_VALIDATION_FAILED: &str = "instanceValidationFailed";
/// Default failure reason of a group validation task.
pub const GROUP_VALIDATION_FAILED: &str = "groupValidationFailed";

/// Flags recording progress through a single validation round.
const PROGRESS: [&str; 7] = [
    labels::IMAGING,
    labels::IMAGING_COMPLETED,
    labels::CHECKING,
    labels::CHECKING_GROUP,
    labels::INSTANCE_VALIDATION_COMPLETED,
    labels::CHECKING_COMPLETED,
    labels::CHECKING_COMPLETED_GROUP,
];

/// A label mutation on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Imaging started; group rounds also record their validation id.
    ValidationStarted { validation_id: Option<String> },
    ImagingCompleted,
    /// Record the firmware build installed by the validation image.
    RecordFirmware(String),
    VerificationStarted,
    GroupVerificationStarted,
    /// The instance task finished. `group_pending` keeps a passing host
    /// waiting for the group task instead of completing it.
    VerificationCompleted {
        failed: bool,
        reason: Option<String>,
        group_pending: bool,
    },
    GroupVerificationCompleted { failed: bool, reason: Option<String> },
    MarkMaster,
    /// Write an election claim unless one is already present.
    ClaimMaster { candidate: String },
    MarkForDeletion,
    /// Leave the validation pipeline; only a passing host is marked verified.
    ValidationComplete { failed: bool },
    /// Re-enroll the host because its firmware is out of date.
    TriggerFwUpgrade,
}

impl Transition {
    /// Compute the label map after this transition.
    #[must_use]
    pub fn apply(&self, current: &Labels) -> Labels {
        let mut next = current.clone();
        match self {
            Self::ValidationStarted { validation_id } => {
                set(&mut next, labels::IMAGING, labels::TRUE);
                remove(&mut next, &[labels::VERIFIED, labels::CHECKING_FAILED]);
                if let Some(id) = validation_id {
                    set(&mut next, labels::VALIDATION_ID, id);
                }
            }
            Self::ImagingCompleted => {
                remove(&mut next, &[labels::IMAGING]);
                set(&mut next, labels::IMAGING_COMPLETED, labels::TRUE);
            }
            Self::RecordFirmware(version) => {
                if !version.is_empty() {
                    set(&mut next, labels::FW_VERSION, &label_value(version));
                }
            }
            Self::VerificationStarted => {
                remove(&mut next, &[labels::IMAGING_COMPLETED]);
                set(&mut next, labels::CHECKING, labels::TRUE);
            }
            Self::GroupVerificationStarted => {
                remove(&mut next, &[labels::INSTANCE_VALIDATION_COMPLETED]);
                set(&mut next, labels::CHECKING_GROUP, labels::TRUE);
            }
            Self::VerificationCompleted {
                failed,
                reason,
                group_pending,
            } => {
                remove(&mut next, &[labels::IMAGING, labels::IMAGING_COMPLETED, labels::CHECKING]);
                if *failed {
                    set(&mut next, labels::CHECKING_COMPLETED, labels::TRUE);
                    let reason = reason.as_deref().unwrap_or(INSTANCE_VALIDATION_FAILED);
                    set(&mut next, labels::CHECKING_FAILED, &label_value(reason));
                } else if *group_pending {
                    set(&mut next, labels::INSTANCE_VALIDATION_COMPLETED, labels::TRUE);
                } else {
                    set(&mut next, labels::CHECKING_COMPLETED, labels::TRUE);
                }
            }
            Self::GroupVerificationCompleted { failed, reason } => {
                remove(&mut next, &PROGRESS);
                set(&mut next, labels::CHECKING_COMPLETED, labels::TRUE);
                set(&mut next, labels::CHECKING_COMPLETED_GROUP, labels::TRUE);
                if *failed {
                    let reason = reason.as_deref().unwrap_or(GROUP_VALIDATION_FAILED);
                    set(&mut next, labels::CHECKING_FAILED, &label_value(reason));
                }
            }
            Self::MarkMaster => set(&mut next, labels::MASTER_NODE, labels::TRUE),
            Self::ClaimMaster { candidate } => {
                next.entry(labels::MASTER_CLAIM.to_string())
                    .or_insert_with(|| candidate.clone());
            }
            Self::MarkForDeletion => set(&mut next, labels::DELETION, labels::TRUE),
            Self::ValidationComplete { failed } => {
                remove(&mut next, &PROGRESS);
                remove(
                    &mut next,
                    &[
                        labels::DELETION,
                        labels::MASTER_NODE,
                        labels::MASTER_CLAIM,
                        labels::VALIDATION_ID,
                        labels::FW_UPDATE_TRIGGER,
                        labels::READY_TO_TEST,
                    ],
                );
                if !*failed {
                    remove(&mut next, &[labels::CHECKING_FAILED]);
                    set(&mut next, labels::VERIFIED, labels::TRUE);
                }
            }
            Self::TriggerFwUpgrade => {
                remove(&mut next, &[labels::VERIFIED, labels::CHECKING_FAILED]);
                set(&mut next, labels::READY_TO_TEST, labels::TRUE);
                set(&mut next, labels::FW_UPDATE_TRIGGER, labels::TRUE);
            }
        }
        next
    }
}

/// Apply `transitions` in order.
#[must_use]
pub fn apply_all(current: &Labels, transitions: &[Transition]) -> Labels {
    transitions.iter().fold(current.clone(), |acc, t| t.apply(&acc))
}

/// Make `value` a valid label value: at most 63 characters from `[A-Za-z0-9._-]`,
/// starting and ending with an alphanumeric.
#[must_use]
pub fn label_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '.' })
        .take(63)
        .collect();
    cleaned
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

fn set(host_labels: &mut Labels, key: &str, value: &str) {
    host_labels.insert(key.to_string(), value.to_string());
}

fn remove(host_labels: &mut Labels, keys: &[&str]) {
    for key in keys {
        host_labels.remove(*key);
    }
}
