//! REST error types

use reqwest::StatusCode;
use thiserror::Error;

/// Request/response failure with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    /// HTTP status, when the server answered at all
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status.as_u16());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvalidRequest, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ServerError, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Decode, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unknown, message)
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: StatusCode, detail: &str) -> Self {
        let error = match status.as_u16() {
            401 | 403 => Self::auth(format!("Authentication failed: {detail}")),
            404 => Self::not_found(format!("Not found: {detail}")),
            400 | 422 => Self::invalid_request(format!("Invalid request: {detail}")),
            500..=599 => Self::server_error(format!("Server error: {detail}")),
            _ => Self::unknown(format!("HTTP {status}: {detail}")),
        };
        error.with_status(status)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::network(format!("Request timeout: {e}"))
        } else if e.is_connect() {
            ApiError::network(format!("Connection failed: {e}"))
        } else if e.is_decode() {
            ApiError::decode(format!("Failed to parse response: {e}"))
        } else {
            ApiError::unknown(format!("Request failed: {e}"))
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Network issues, timeouts
    Network,
    /// Authentication failed (401, 403)
    Auth,
    /// Unknown conversation (404)
    NotFound,
    /// Rejected by validation (400, 422)
    InvalidRequest,
    /// Server error (5xx)
    ServerError,
    /// Response body did not match the expected shape
    Decode,
    Unknown,
}
