//! Configuration handlers.

use super::{SetSpeedLimitRequest, SpeedLimitResponse};
use crate::api::AppState;
use crate::error::Result;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

/// GET /config - Get current config
#[utoipa::path(
    get,
    path = "/config",
    tag = "config",
    responses(
        (status = 200, description = "Current configuration", body = crate::config::Config)
    )
)]
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.service.get_config();
    (StatusCode::OK, Json((*config).clone()))
}

/// GET /config/speed-limit - Get speed limit
#[utoipa::path(
    get,
    path = "/config/speed-limit",
    tag = "config",
    responses(
        (status = 200, description = "Current speed limit in bytes per second", body = SpeedLimitResponse)
    )
)]
pub async fn get_speed_limit(State(state): State<AppState>) -> impl IntoResponse {
    Json(SpeedLimitResponse {
        limit_bps: state.service.get_speed_limit(),
    })
}

/// PUT /config/speed-limit - Set speed limit
#[utoipa::path(
    put,
    path = "/config/speed-limit",
    tag = "config",
    request_body = SetSpeedLimitRequest,
    responses(
        (status = 204, description = "Speed limit updated successfully"),
        (status = 400, description = "The throttle policy has no adjustable limit", body = crate::error::ApiError)
    )
)]
pub async fn set_speed_limit(
    State(state): State<AppState>,
    Json(request): Json<SetSpeedLimitRequest>,
) -> Result<StatusCode> {
    state.service.set_speed_limit(request.limit_bps).await?;
    Ok(StatusCode::NO_CONTENT)
}
