//! Compute client errors

use thiserror::Error;

/// Errors returned by the compute and machine image APIs
#[derive(Debug, Error)]
pub enum ComputeError {
    /// The referenced resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other gRPC status returned by the server
    #[error("gRPC error: {0}")]
    Status(tonic::Status),

    /// Connection to the server failed
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The configured server address is not a valid URI
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The server answered with an unusable response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<tonic::Status> for ComputeError {
    fn from(status: tonic::Status) -> Self {
        if status.code() == tonic::Code::NotFound {
            Self::NotFound(status.message().to_string())
        } else {
            Self::Status(status)
        }
    }
}

impl ComputeError {
    /// True when the resource was already gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err: ComputeError = tonic::Status::not_found("instance gone").into();
        assert!(err.is_not_found());

        let err: ComputeError = tonic::Status::unavailable("try later").into();
        assert!(!err.is_not_found());
        assert!(matches!(err, ComputeError::Status(_)));
    }
}
