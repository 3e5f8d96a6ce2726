//! API error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use threadflow_payments::{PaymentsError, ProcessorError};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Terminal business rejection; redelivery or retry cannot change it
    #[error("{0}")]
    Rejected(String),

    /// Transient upstream failure; the client should retry
    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("internal server error")]
    Internal(String),
}

impl From<PaymentsError> for ApiError {
    fn from(err: PaymentsError) -> Self {
        match &err {
            PaymentsError::Processor(ProcessorError::NotFound) => {
                ApiError::NotFound("charge not found at payment processor".to_string())
            }
            _ if err.is_transient() => {
                tracing::warn!(error = %err, "Transient payments failure");
                ApiError::UpstreamUnavailable(
                    "payment service temporarily unavailable, please retry".to_string(),
                )
            }
            _ => {
                tracing::error!(error = %err, "Unexpected payments failure");
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Rejected(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            ApiError::UpstreamUnavailable(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}
