//! # Error Handling
//!
//! Defines the application error type and how it converts into HTTP
//! responses. All REST failures share one JSON envelope:
//!
//! ```json
//! {
//!   "error": {
//!     "type": "validation_error",
//!     "message": "unsupported audio format",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! Streaming-session errors travel over the WebSocket instead (a single
//! `{"error": …}` frame followed by a close); this type only covers the
//! REST surface.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application error categories and their HTTP mappings.
///
/// - **Internal** / **ConfigError** → 500
/// - **BadRequest** / **ValidationError** → 400
/// - **NotFound** → 404
/// - **ServiceUnavailable** → 503 (upstream translation provider failures)
#[derive(Debug)]
pub enum AppError {
    /// Server-side problems that are not the client's fault.
    Internal(String),

    /// The client sent invalid or malformed data.
    BadRequest(String),

    /// The requested resource does not exist.
    NotFound(String),

    /// Configuration file or environment variable problems.
    ConfigError(String),

    /// User input failed validation rules.
    ValidationError(String),

    /// The upstream cloud provider could not serve the request.
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            AppError::ServiceUnavailable(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing failures are the client's malformed data, not ours.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Outbound calls to the translation provider surface as 503s so clients
/// can distinguish "retry later" from their own bad input.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ServiceUnavailable(format!("translation provider error: {}", err))
    }
}

/// Shorthand for results carrying an [`AppError`].
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let cases = [
            (AppError::Internal("x".into()), 500),
            (AppError::BadRequest("x".into()), 400),
            (AppError::NotFound("x".into()), 404),
            (AppError::ConfigError("x".into()), 500),
            (AppError::ValidationError("x".into()), 400),
            (AppError::ServiceUnavailable("x".into()), 503),
        ];

        for (error, expected) in cases {
            assert_eq!(error.error_response().status().as_u16(), expected);
        }
    }

    #[test]
    fn test_display_includes_category_and_message() {
        let err = AppError::ValidationError("unsupported audio format".into());
        assert_eq!(err.to_string(), "Validation error: unsupported audio format");
    }
}
