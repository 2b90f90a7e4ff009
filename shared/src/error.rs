//! Error types for the document analysis service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::ApiResponse;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Message returned to callers for faults whose detail stays in the server logs.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error occurred while processing the request";

/// Errors that can occur while serving an analysis request.
#[derive(Error, Debug)]
pub enum Error {
    /// A required configuration value is absent or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A secret could not be fetched from the parameter store
    #[error("Secret unavailable: {0}")]
    SecretUnavailable(String),

    /// Client input is malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Request body or uploaded document exceeds the size limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Shared-secret check failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The inference engine reported a failure
    #[error("Upstream service error: {0}")]
    Upstream(String),

    /// The usage record could not be written after a successful analysis
    #[error("Failed to persist usage record {record_id}: {message}")]
    Persistence { record_id: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::PayloadTooLarge(_) => 413,
            Error::Upstream(_) | Error::SecretUnavailable(_) => 502,
            _ => 500,
        }
    }

    /// Message that is safe to hand back to the caller.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(message)
            | Error::PayloadTooLarge(message)
            | Error::Unauthorized(message) => message.clone(),
            Error::Upstream(message) => format!("Bedrock service error: {}", message),
            Error::SecretUnavailable(_) => "Required secret is unavailable".to_string(),
            Error::Persistence { record_id, .. } => {
                format!("Analysis completed but usage record {} could not be saved", record_id)
            }
            Error::Config(_) | Error::Serialization(_) | Error::Internal(_) => {
                INTERNAL_ERROR_MESSAGE.to_string()
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match &self {
            Error::Validation(_) | Error::PayloadTooLarge(_) | Error::Unauthorized(_) => {
                tracing::warn!(status = status.as_u16(), error = %self, "Request rejected")
            }
            _ => tracing::error!(status = status.as_u16(), error = %self, "Request failed"),
        }

        (status, axum::Json(ApiResponse::<()>::error(self.user_message()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("bad".into()).status_code(), 400);
        assert_eq!(Error::Unauthorized("no".into()).status_code(), 401);
        assert_eq!(Error::PayloadTooLarge("big".into()).status_code(), 413);
        assert_eq!(Error::Upstream("throttled".into()).status_code(), 502);
        assert_eq!(Error::SecretUnavailable("ssm".into()).status_code(), 502);
        assert_eq!(Error::Internal("boom".into()).status_code(), 500);
        assert_eq!(
            Error::Persistence {
                record_id: "abc".into(),
                message: "table missing".into()
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let err = Error::Internal("connection reset by peer at 10.0.0.4".into());
        assert_eq!(err.user_message(), INTERNAL_ERROR_MESSAGE);
        assert!(err.to_string().contains("10.0.0.4"));
    }

    #[test]
    fn test_upstream_message_passes_through() {
        let err = Error::Upstream("ThrottlingException: Too many requests".into());
        assert!(err.user_message().contains("Too many requests"));
    }

    #[test]
    fn test_persistence_message_names_record() {
        let err = Error::Persistence {
            record_id: "req-42".into(),
            message: "ResourceNotFoundException".into(),
        };
        assert!(err.user_message().contains("req-42"));
        assert!(!err.user_message().contains("ResourceNotFoundException"));
    }
}
