//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ledger::LedgerError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown resource (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Malformed request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Ledger failure (500)
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Ledger(_) => (StatusCode::INTERNAL_SERVER_ERROR, "LEDGER_ERROR"),
        };

        let body = Json(json!({
            "error": error_code,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
