//! API error types and JSON error response formatting.
//!
//! Every endpoint fails with the same `{error, message, details}` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use beacon_core::error::BeaconError;
use beacon_engine::EngineError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - malformed path or query parameter.
    BadRequest(String),
    NotFound(String),
    /// 422 Unprocessable Entity - rule definition failed validation.
    UnprocessableEntity(String),
    Internal(String),
    /// 503 Service Unavailable - engine is shutting down.
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::UnprocessableEntity(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable_entity", msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal API error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<BeaconError> for ApiError {
    fn from(err: BeaconError) -> Self {
        match err {
            BeaconError::Validation(msg) => ApiError::UnprocessableEntity(msg),
            BeaconError::NotFound(msg) => ApiError::NotFound(msg),
            BeaconError::ShuttingDown => {
                ApiError::ServiceUnavailable("Shutdown in progress".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ShuttingDown => {
                ApiError::ServiceUnavailable("Engine is shutting down".to_string())
            }
            EngineError::Storage(inner) => inner.into(),
        }
    }
}
