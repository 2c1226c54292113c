//! HTTP error response handling for the API
//!
//! This module provides conversions from domain errors to HTTP responses
//! with appropriate status codes and JSON error bodies.

use crate::error::{ApiError, Error, ToHttpStatus};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Implement IntoResponse for Error to automatically convert errors to HTTP responses
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let api_error: ApiError = self.into();

        (status_code, Json(api_error)).into_response()
    }
}

/// Implement IntoResponse for ApiError for explicit error responses
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Default to 500 if we're directly converting an ApiError
        // (usually errors go through Error::into_response which has the status code)
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn api_error_of(response: Response) -> ApiError {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn not_found_becomes_404_with_path_details() {
        let response = Error::NotFound("reports/q3.pdf".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let api_error = api_error_of(response).await;
        assert_eq!(api_error.error.code, "not_found");
        assert!(api_error.error.message.contains("reports/q3.pdf"));
        assert_eq!(api_error.error.details.unwrap()["path"], "reports/q3.pdf");
    }

    #[tokio::test]
    async fn invalid_path_becomes_400() {
        let response = Error::InvalidPath {
            path: PathBuf::from("/etc/passwd"),
            reason: "absolute paths are not allowed".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api_error_of(response).await.error.code, "invalid_path");
    }

    #[tokio::test]
    async fn shutting_down_becomes_503() {
        let response = Error::ShuttingDown.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api_error_of(response).await.error.code, "shutting_down");
    }

    #[tokio::test]
    async fn bare_api_error_defaults_to_500() {
        let response = ApiError::validation("bad input").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error_of(response).await.error.code, "validation_error");
    }
}
