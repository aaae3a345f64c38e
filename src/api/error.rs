//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::reconciler::ReconcilerError;
use crate::service::ServiceError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Policy violation: {0}")]
    PolicyViolation(String),
    #[error("Conflict")]
    Conflict,
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("Queue full")]
    QueueFull,
    #[error("Upstream failure: {0}")]
    Upstream(String),
    #[error("Deadline exceeded")]
    Timeout,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "INVALID", detail.clone())
            }
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Caller lacks rights for this action".to_string(),
            ),
            ApiError::PolicyViolation(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "POLICY_VIOLATION",
                detail.clone(),
            ),
            ApiError::Conflict => (
                StatusCode::CONFLICT,
                "CONFLICT",
                "Concurrent update detected".to_string(),
            ),
            ApiError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Rate limit exceeded. Retry after {retry_after}s"),
            ),
            ApiError::QueueFull => (
                StatusCode::SERVICE_UNAVAILABLE,
                "QUEUE_FULL",
                "Too many requests in flight for this patient".to_string(),
            ),
            ApiError::Upstream(detail) => {
                // Upstream details are operator information, not
                // patient-visible content.
                tracing::warn!(detail = %detail, "upstream AI failure surfaced to API");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM",
                    "The analysis service is temporarily unavailable".to_string(),
                )
            }
            ApiError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                "The request deadline was exceeded".to_string(),
            ),
            ApiError::InvalidTransition(detail) => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                detail.clone(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after } = &self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Invalid(m) => ApiError::BadRequest(m),
            ServiceError::NotFound(e) => ApiError::NotFound(format!("{e} not found")),
            ServiceError::Unauthorized => ApiError::Unauthorized,
            ServiceError::PolicyViolation(m) => ApiError::PolicyViolation(m),
            ServiceError::Conflict => ApiError::Conflict,
            ServiceError::RateLimited { retry_after_s } => ApiError::RateLimited {
                retry_after: retry_after_s,
            },
            ServiceError::QueueFull => ApiError::QueueFull,
            ServiceError::Upstream(m) => ApiError::Upstream(m),
            ServiceError::Timeout => ApiError::Timeout,
            ServiceError::Fatal(m) => ApiError::Internal(m),
        }
    }
}

impl From<ReconcilerError> for ApiError {
    fn from(err: ReconcilerError) -> Self {
        match err {
            ReconcilerError::Unauthorized => ApiError::Unauthorized,
            ReconcilerError::InvalidTransition { from, to } => {
                ApiError::InvalidTransition(format!("cannot move {from} -> {to}"))
            }
            ReconcilerError::Invalid(m) => ApiError::BadRequest(m),
            ReconcilerError::NotFound => ApiError::NotFound("bridge query not found".into()),
            ReconcilerError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}
