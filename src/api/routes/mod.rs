//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`download`] - Throttled file downloads
//! - [`config`] - Configuration and bandwidth limit
//! - [`system`] - Health, statistics, events, OpenAPI

use serde::{Deserialize, Serialize};

mod config;
mod download;
mod system;

// Re-export all handlers so `routes::function_name` works
pub use config::*;
pub use download::*;
pub use system::*;

/// Request body for PUT /config/speed-limit
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SetSpeedLimitRequest {
    /// Speed limit in bytes per second. Use null for unlimited.
    pub limit_bps: Option<u64>,
}

/// Response body for GET /config/speed-limit
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SpeedLimitResponse {
    /// Current aggregate limit in bytes per second (null = unlimited)
    pub limit_bps: Option<u64>,
}
