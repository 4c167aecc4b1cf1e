use crate::decoder::DecodeError;
use crate::review::GroupVersionResource;

use thiserror::Error;

/// Message reported to callers for every rejected input, whatever the cause.
pub const INPUT_REJECTED_MESSAGE: &str = "no name was provided in the HTTP body";
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

#[derive(Error, Debug)]
pub enum Error {
    #[error("request body is empty")]
    EmptyBody,

    #[error("{0}: {1}")]
    InvalidBodyEncoding(String, String),

    #[error("failed to decode admission review: {0}")]
    DecodeEnvelope(#[source] serde_json::Error),

    #[error("admission review has no request")]
    MissingRequest,

    #[error("unsupported resource: {0}")]
    UnsupportedResource(GroupVersionResource),

    #[error("failed to decode pod: {0}")]
    DecodeObject(#[source] DecodeError),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),

    #[error("telemetry initialization failed: {0}")]
    TelemetryInit(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::EmptyBody
                | Error::InvalidBodyEncoding(..)
                | Error::DecodeEnvelope(_)
                | Error::MissingRequest
                | Error::UnsupportedResource(_)
                | Error::DecodeObject(_)
        )
    }

    /// What the caller gets to see. Causes are only distinguishable in logs and
    /// through [`Error::error_type`].
    pub fn public_message(&self) -> &'static str {
        if self.is_input_error() {
            INPUT_REJECTED_MESSAGE
        } else {
            INTERNAL_ERROR_MESSAGE
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Error::EmptyBody => "EmptyBody",
            Error::InvalidBodyEncoding(..) => "InvalidBodyEncoding",
            Error::DecodeEnvelope(_) => "DecodeEnvelopeFailed",
            Error::MissingRequest => "MissingRequest",
            Error::UnsupportedResource(_) => "UnsupportedResource",
            Error::DecodeObject(_) => "DecodeObjectFailed",
            Error::SerializationError(..) => "SerializationFailed",
            Error::TelemetryInit(_) => "TelemetryInit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors_share_sentinel() {
        let errors = [
            Error::EmptyBody,
            Error::MissingRequest,
            Error::InvalidBodyEncoding("invalid base64 body".to_string(), "bad".to_string()),
            Error::UnsupportedResource(GroupVersionResource::new("apps", "v1", "deployments")),
            Error::DecodeObject(DecodeError::MissingObject),
        ];
        for error in errors {
            assert!(error.is_input_error());
            assert_eq!(error.public_message(), INPUT_REJECTED_MESSAGE);
        }
    }

    #[test]
    fn test_internal_errors_are_not_input_errors() {
        let error = Error::TelemetryInit("no exporter".to_string());
        assert!(!error.is_input_error());
        assert_eq!(error.public_message(), INTERNAL_ERROR_MESSAGE);
    }

    #[test]
    fn test_error_type_keeps_cause() {
        assert_eq!(Error::EmptyBody.error_type(), "EmptyBody");
        assert_eq!(
            Error::UnsupportedResource(GroupVersionResource::new("apps", "v1", "deployments"))
                .error_type(),
            "UnsupportedResource"
        );
        assert_eq!(
            Error::UnsupportedResource(GroupVersionResource::new("apps", "v1", "deployments"))
                .to_string(),
            "unsupported resource: apps/v1, Resource=deployments"
        );
    }
}
