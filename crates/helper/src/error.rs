//! Wire-level error type for the helper daemon.
//!
//! Every route maps its failure into one of these variants, which in turn
//! maps onto the status codes of spec §6.2: 400/403/409/429/500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HelperError {
    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("update already running")]
    Conflict,

    #[error("too many concurrent requests")]
    TooManyRequests,

    #[error("operation failed: {0}")]
    Internal(String),
}

impl IntoResponse for HelperError {
    fn into_response(self) -> Response {
        let status = match &self {
            HelperError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HelperError::Forbidden(_) => StatusCode::FORBIDDEN,
            HelperError::Conflict => StatusCode::CONFLICT,
            HelperError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            HelperError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, axum::Json(json!({"error": self.to_string()}))).into_response()
    }
}

pub type HelperResult<T> = Result<T, HelperError>;
