// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reelforge_core::media::CompositionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// The resource existed but its lifetime has run out
    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert reelforge_core errors to HTTP errors
impl From<reelforge_core::Error> for AppError {
    fn from(err: reelforge_core::Error) -> Self {
        use reelforge_core::Error;

        match err {
            Error::NotFound(msg) => Self::not_found(format!("{msg} not found")),
            Error::Expired(msg) => Self::gone(format!("{msg} has expired")),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::Composition(e) => e.into(),
            Error::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                Self::internal_server_error("Service temporarily unavailable")
            }
            Error::RateLimit(e) => {
                tracing::error!("Rate limiter error: {}", e);
                Self::internal_server_error("Service temporarily unavailable")
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal_server_error("Data processing error")
            }
            Error::Io(e) => {
                tracing::error!("I/O error: {}", e);
                Self::internal_server_error("Internal server error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal_server_error("Internal server error")
            }
        }
    }
}

/// Validation failures become 400s; server paths are reduced to file names.
impl From<CompositionError> for AppError {
    fn from(err: CompositionError) -> Self {
        match err {
            CompositionError::SourceNotFound(path) => Self::bad_request(format!(
                "source not found: {}",
                path.file_name().map_or_else(|| "(unnamed)".into(), |n| n.to_string_lossy())
            )),
            CompositionError::InvalidRequest(msg) => Self::bad_request(msg),
            other => {
                tracing::error!("Composition error: {}", other);
                Self::internal_server_error("Generation failed")
            }
        }
    }
}
