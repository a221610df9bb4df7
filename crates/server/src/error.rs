//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cairn_metadata::{MetadataError, UpsertError};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("{0}")]
    Upsert(#[from] UpsertError),

    #[error("{0}")]
    Core(#[from] cairn_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Metadata(_) => "metadata_error",
            Self::Upsert(e) => match e {
                UpsertError::InvalidRequest(_) => "bad_request",
                UpsertError::RetriesExhausted { .. } => "upsert_failed",
                UpsertError::Cancelled { .. } => "upsert_cancelled",
            },
            Self::Core(_) => "bad_request",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(e) => match e {
                MetadataError::Constraint(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Upsert(e) => match e {
                UpsertError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                // Data-layer failure: the client may retry later.
                UpsertError::RetriesExhausted { .. } | UpsertError::Cancelled { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_metadata::TransactionError;
    use cairn_metadata::upsert::UpsertStage;

    #[test]
    fn test_retry_exhaustion_is_service_unavailable() {
        let err = ApiError::from(UpsertError::RetriesExhausted {
            instance_id: "i-1".to_string(),
            attempts: 3,
            last: TransactionError::new(
                UpsertStage::Commit,
                MetadataError::Internal("serialization failure".to_string()),
            ),
        });
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "upsert_failed");
    }

    #[test]
    fn test_invalid_input_is_bad_request() {
        let err = ApiError::from(cairn_core::Error::InvalidAddress("nope".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "bad_request");
    }
}
