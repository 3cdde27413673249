//! Controller-specific error types.
//!
//! Besides wrapping the errors of the clients the operator talks to, the
//! controller classifies failures as retryable (transient, try again later)
//! or non-retryable (permanent for the current inputs). The reconciler is the
//! only place that turns a classification into a label mutation.

use compute_client::ComputeError;
use kube::Error as KubeError;
use netbox_client::NetBoxError;
use ssh_client::SshError;
use thiserror::Error;

/// Errors that can occur in the validation controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// NetBox API error
    #[error("NetBox error: {0}")]
    NetBox(#[from] NetBoxError),

    /// Compute or machine image API error
    #[error("Compute API error: {0}")]
    Compute(#[from] ComputeError),

    /// SSH error talking to the bastion or the instance
    #[error("SSH error: {0}")]
    Ssh(#[from] SshError),

    /// Local filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or cloud-init rendering error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Firmware map decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Artifact repository error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Transient failure, the step should be tried again
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent failure for the current inputs
    #[error("Non-retryable error: {0}")]
    NonRetryable(String),

    /// A step failed; keeps the cause so classification survives wrapping
    #[error("{context}: {source}")]
    Context {
        /// The step that failed
        context: String,
        /// What made it fail
        #[source]
        source: Box<ControllerError>,
    },

    /// Label update still conflicted after all attempts
    #[error("Conflict updating {0}")]
    Conflict(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Transient failure described by `msg`.
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Permanent failure described by `msg`.
    pub fn non_retryable(msg: impl Into<String>) -> Self {
        Self::NonRetryable(msg.into())
    }

    /// Wrap `self` with a description of the failed step.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True when this error, or any error it wraps, is `Retryable`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.chain().any(|e| matches!(e, Self::Retryable(_)))
    }

    /// True when this error, or any error it wraps, is `NonRetryable`.
    #[must_use]
    pub fn is_non_retryable(&self) -> bool {
        self.chain().any(|e| matches!(e, Self::NonRetryable(_)))
    }

    /// `ControllerError`s along the `Context` chain, starting with `self`.
    fn chain(&self) -> impl Iterator<Item = &ControllerError> {
        std::iter::successors(Some(self), |e| match e {
            Self::Context { source, .. } => Some(source.as_ref()),
            _ => None,
        })
    }

    /// True for a Kubernetes 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(KubeError::Api(ae)) if ae.code == 404)
    }
}
