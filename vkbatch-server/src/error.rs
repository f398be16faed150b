//! API error handling module
//!
//! Provides a unified error type for all API endpoints with structured error variants.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use vkbatch_core::VkBatchError;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Error from the batch core
    #[error("Batch error: {0}")]
    Core(#[from] VkBatchError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Core(ref e) => match e {
                // Caller errors
                VkBatchError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                VkBatchError::RowAlreadyProcessed(_) => StatusCode::CONFLICT,
                VkBatchError::RowOutOfRange { .. }
                | VkBatchError::InvalidConfig(_)
                | VkBatchError::InvalidManifest(_) => StatusCode::BAD_REQUEST,

                // VK failures → 502
                VkBatchError::EndpointUnavailable(_)
                | VkBatchError::UploadFailed(_)
                | VkBatchError::PersistFailed(_)
                | VkBatchError::VkApi { .. }
                | VkBatchError::HttpError(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }

    /// Get the error code for programmatic error handling
    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Core(ref e) => match e {
                VkBatchError::InvalidConfig(_) => "INVALID_CONFIG",
                VkBatchError::InvalidManifest(_) => "INVALID_MANIFEST",
                VkBatchError::SessionNotFound(_) => "SESSION_NOT_FOUND",
                VkBatchError::RowOutOfRange { .. } => "ROW_OUT_OF_RANGE",
                VkBatchError::RowAlreadyProcessed(_) => "ROW_ALREADY_PROCESSED",
                VkBatchError::EndpointUnavailable(_) => "ENDPOINT_UNAVAILABLE",
                VkBatchError::UploadFailed(_) => "UPLOAD_FAILED",
                VkBatchError::PersistFailed(_) => "PERSIST_FAILED",
                VkBatchError::VkApi { .. } => "VK_API_ERROR",
                VkBatchError::HttpError(_) => "UPSTREAM_ERROR",
            },
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Core(VkBatchError::HttpError(_)) => "Upstream service error".to_string(),
            // Caller errors and VK messages are safe to echo
            Self::Core(e) => e.to_string(),
            Self::BadRequest(_) => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Core(_) => "core",
        }
    }

    fn is_client_error(&self) -> bool {
        match self {
            Self::BadRequest(_) => true,
            Self::Core(e) => e.is_caller_error(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        if self.is_client_error() {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        } else {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                client_message = %client_message,
                "Server error"
            );
        }

        // All error responses include a `code` field for programmatic error handling
        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors_map_to_4xx() {
        let not_found = ApiError::from(VkBatchError::SessionNotFound("x".into()));
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let range = ApiError::from(VkBatchError::RowOutOfRange { index: 3, total: 1 });
        assert_eq!(range.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(range.error_code(), "ROW_OUT_OF_RANGE");

        let conflict = ApiError::from(VkBatchError::RowAlreadyProcessed(0));
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_vk_errors_map_to_bad_gateway() {
        let err = ApiError::from(VkBatchError::VkApi {
            code: 5,
            message: "auth".into(),
        });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.error_code(), "VK_API_ERROR");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_bad_request_is_client_error() {
        let err = ApiError::bad_request("Missing required field: config");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "INVALID_INPUT");
        assert!(err.is_client_error());
        assert_eq!(
            err.client_message(),
            "Bad request: Missing required field: config"
        );
    }
}
