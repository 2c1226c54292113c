//! Download handler.

use crate::api::AppState;
use crate::error::Result;
use axum::{
    extract::{Path, State},
    http::Uri,
    response::Response,
};

/// GET /download/*path - Stream a file in permit-sized chunks
///
/// Headers (`Content-Length`, `x-request-id`) are sent immediately; the body
/// follows at whatever rate the admission gate allows.
#[utoipa::path(
    get,
    path = "/download/{path}",
    tag = "downloads",
    params(
        ("path" = String, Path, description = "File path relative to the served root directory")
    ),
    responses(
        (status = 200, description = "File contents, streamed", content_type = "application/octet-stream"),
        (status = 400, description = "Path rejected", body = crate::error::ApiError),
        (status = 404, description = "File not found", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn download_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    uri: Uri,
) -> Result<Response> {
    state.service.serve(&path, uri).await
}
