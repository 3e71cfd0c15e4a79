use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    /// Expected business rejection; `code` is stable for clients to match on.
    #[error("Rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, code) = match &self {
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Rejected { code, message } => (StatusCode::CONFLICT, message, Some(code)),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg, None),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
        };

        tracing::error!("Error: {}: {}", status, message);

        let body = match code {
            Some(code) => Json(json!({ "error": message, "code": code })),
            None => Json(json!({ "error": message })),
        };

        (status, body).into_response()
    }
}
