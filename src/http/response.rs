//! Error responses.
//!
//! # Responsibilities
//! - Map envelope errors to HTTP status codes
//! - Keep infrastructure details out of client-facing bodies
//!
//! # Design Decisions
//! - Business-rule failures echo their message; 5xx bodies are generic and
//!   the detail goes to the log instead

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::envelope::{EnvelopeError, ErrorKind};

/// JSON error body: `{"error": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// An [`EnvelopeError`] on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub EnvelopeError);

impl From<EnvelopeError> for ApiError {
    fn from(e: EnvelopeError) -> Self {
        Self(e)
    }
}

/// Status code for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Depleted => StatusCode::GONE,
        ErrorKind::Infra => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        let error = if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Request failed");
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable, try again".to_string(),
                _ => "Internal error".to_string(),
            }
        } else {
            self.0.to_string()
        };

        (status, Json(ErrorBody { error })).into_response()
    }
}
