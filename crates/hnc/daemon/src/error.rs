//! Error types for hnc-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hnc_admission::AdmissionError;
use hnc_client::ClientError;
use hnc_types::OptionsError;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors; all of them end the process
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid HNC options: {0}")]
    Options(#[from] OptionsError),

    #[error("Could not load seed manifests: {0}")]
    Seed(#[from] ClientError),

    #[error("Server error: {0}")]
    Server(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the HTTP surfaces
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Client(ClientError::NotFound(_) | ClientError::UnknownResource(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            ApiError::Client(ClientError::Timeout(_)) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            ApiError::Client(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CLIENT_ERROR"),
            ApiError::Admission(AdmissionError::UnknownPath(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Admission(_) => (StatusCode::BAD_REQUEST, "BAD_REVIEW"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Client(ClientError::UnknownResource("widgets".into()))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Admission(AdmissionError::MissingRequest)
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
    }
}
