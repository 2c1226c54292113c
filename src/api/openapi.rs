//! OpenAPI documentation and schema generation
//!
//! Defines the OpenAPI specification for the throttled-dl REST API using
//! utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the throttled-dl REST API
///
/// The spec can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "throttled-dl REST API",
        version = "0.1.0",
        description = "Chunked file downloads throttled by a shared bandwidth budget, plus monitoring and runtime limit control",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server")
    ),
    paths(
        // Downloads
        crate::api::routes::download_file,

        // Configuration
        crate::api::routes::get_config,
        crate::api::routes::get_speed_limit,
        crate::api::routes::set_speed_limit,

        // System
        crate::api::routes::health_check,
        crate::api::routes::get_stats,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::RequestId,
        crate::types::Event,
        crate::types::ServiceStats,

        // Config types from config.rs
        crate::config::Config,
        crate::config::ServerConfig,
        crate::config::FilesConfig,
        crate::config::TransferConfig,
        crate::config::ThrottleConfig,
        crate::config::ThrottlePolicy,

        // API request/response types
        crate::api::routes::SetSpeedLimitRequest,
        crate::api::routes::SpeedLimitResponse,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "downloads", description = "Downloads - Stream files in permit-sized chunks"),
        (name = "config", description = "Configuration - Inspect configuration and change the bandwidth limit"),
        (name = "system", description = "System endpoints - Health checks, statistics, OpenAPI spec, events"),
    )
)]
pub struct ApiDoc;
