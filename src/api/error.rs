//! API error types and conversions

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, trace};

use crate::integrity::IntegrityError;
use crate::metric::ValidationError;
use crate::service::ServiceError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Storage operation failed
    StorageError(String),

    /// Invalid request parameters
    InvalidRequest(String),

    /// Resource not found
    NotFound(String),

    /// Internal server error
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::StorageError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::EmptyId => ApiError::NotFound(err.to_string()),
            _ => ApiError::InvalidRequest(err.to_string()),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(err) => err.into(),
            ServiceError::NotFound { .. } => {
                trace!("{err}");
                ApiError::NotFound(err.to_string())
            }
            ServiceError::Storage(err) => {
                error!("storage failure: {err}");
                ApiError::StorageError(err.to_string())
            }
        }
    }
}

impl From<IntegrityError> for ApiError {
    fn from(err: IntegrityError) -> Self {
        match err {
            IntegrityError::HmacCreation(_) => ApiError::Internal(err.to_string()),
            IntegrityError::InvalidFormat | IntegrityError::VerificationFailed => {
                ApiError::InvalidRequest(err.to_string())
            }
        }
    }
}
