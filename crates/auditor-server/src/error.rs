//! HTTP error responses.
//!
//! Every failure is rendered as
//! `{"detail": "...", "error": {"type": "...", "message": "..."}}`.

use auditor_core::AuditorError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

/// Error detail
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    /// Error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message
    pub message: String,
}

#[derive(Serialize)]
struct ApiErrorBody<'a> {
    detail: &'a str,
    error: &'a ApiErrorDetail,
}

/// An error returned to an HTTP client
#[derive(Debug, Clone)]
pub struct ApiError {
    /// Response status
    pub status: StatusCode,
    /// Body detail
    pub detail: ApiErrorDetail,
}

impl ApiError {
    /// Create an error with an explicit status
    pub fn new(
        status: StatusCode,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            detail: ApiErrorDetail {
                error_type: error_type.into(),
                message: message.into(),
            },
        }
    }

    /// 400
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    /// 422, for bodies that fail to parse
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", message)
    }

    /// 401
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "authentication_error", message)
    }

    /// 403
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    /// 404
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 502
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "upstream_error", message)
    }

    /// 500 with a generic message
    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error",
        )
    }

    /// Message sent to the client
    pub fn message(&self) -> &str {
        &self.detail.message
    }
}

impl From<AuditorError> for ApiError {
    fn from(err: AuditorError) -> Self {
        let message = err.to_string();
        let code = err.error_code();
        match err {
            AuditorError::Validation { .. } => Self::new(StatusCode::BAD_REQUEST, code, message),
            AuditorError::Auth(_) => Self::new(StatusCode::UNAUTHORIZED, code, message),
            AuditorError::Forbidden(_) | AuditorError::BudgetExceeded { .. } => {
                Self::new(StatusCode::FORBIDDEN, code, message)
            }
            AuditorError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, code, message),
            AuditorError::Conflict(_) => Self::new(StatusCode::CONFLICT, code, message),
            AuditorError::Storage(_) | AuditorError::Internal(_) => {
                error!(error = %message, "Request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, "Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            detail: &self.detail.message,
            error: &self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.detail.message)
    }
}

impl std::error::Error for ApiError {}

/// Server startup and runtime failures
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Telemetry setup failed
    #[error(transparent)]
    Telemetry(#[from] auditor_telemetry::TelemetryError),
    /// HTTP client construction failed
    #[error("Failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
    /// Binding or serving failed
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Bad bind address
    #[error("Invalid bind address '{0}'")]
    Address(String),
    /// Store setup failed
    #[error(transparent)]
    Storage(#[from] AuditorError),
}
