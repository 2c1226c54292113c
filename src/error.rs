//! Error types for throttled-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error variants (admission, transport, path resolution)
//! - HTTP status code mapping for the request surface
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for throttled-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for throttled-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "transfer.workers")
        key: Option<String>,
    },

    /// I/O error (opening or reading a source file, binding a socket)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested file does not exist
    #[error("file not found: {0}")]
    NotFound(String),

    /// Request path rejected by the path resolver
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The offending path as requested
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// The admission gate failed to answer a permit request
    #[error("admission gate error: {0}")]
    Admission(String),

    /// The transport could not deliver a chunk (client gone, context terminated)
    #[error("transport error: {0}")]
    Transport(String),

    /// Shutdown in progress - not admitting new transfers
    #[error("shutdown in progress: not accepting new transfers")]
    ShuttingDown,

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "file not found: reports/q3.pdf",
///     "details": {
///       "path": "reports/q3.pdf"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "invalid_path")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Error::Config { .. } => 400,
            Error::InvalidPath { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 500 Internal Server Error
            Error::Io(_) => 500,
            Error::Admission(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - the client side of the transport went away
            Error::Transport(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::InvalidPath { .. } => "invalid_path",
            Error::Admission(_) => "admission_error",
            Error::Transport(_) => "transport_error",
            Error::ShuttingDown => "shutting_down",
            Error::ApiServerError(_) => "api_server_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            Error::NotFound(path) => Some(serde_json::json!({
                "path": path,
            })),
            Error::InvalidPath { path, reason } => Some(serde_json::json!({
                "path": path,
                "reason": reason,
            })),
            _ => None,
        };

        match details {
            Some(details) => ApiError::with_details(code, message, details),
            None => ApiError::new(code, message),
        }
    }
}
