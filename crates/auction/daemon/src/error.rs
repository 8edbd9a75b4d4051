//! Error types for auction-daemon

use auction_engine::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
///
/// Business rejections never come through here; they are 200 responses
/// carrying the outcome tag.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Identity headers missing or malformed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Engine(EngineError::InvariantViolation(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INVARIANT_VIOLATION")
            }
            ApiError::Engine(EngineError::Storage(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_ERROR")
            }
            ApiError::Engine(EngineError::Sealing(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SEALING_ERROR")
            }
            ApiError::Engine(EngineError::BalanceSource(_)) => {
                (StatusCode::BAD_GATEWAY, "BALANCE_SOURCE_ERROR")
            }
        };

        if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use auction_storage::StorageError;

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::NotFound("round".to_string())
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Unauthorized("no identity".to_string())
                .into_response()
                .status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(EngineError::InvariantViolation("p1 twice".to_string()))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(EngineError::from(StorageError::Backend("down".to_string())))
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_invariant_violation_body_code() {
        let response =
            ApiError::from(EngineError::InvariantViolation("p1 twice".to_string())).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "INVARIANT_VIOLATION");
    }
}
