use super::*;
use crate::config::ThrottlePolicy;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tower::ServiceExt;

mod config;

/// Helper to create a test DownloadService instance wrapped in Arc
async fn create_test_service(
    policy: ThrottlePolicy,
    limit_bps: Option<u64>,
) -> (Arc<DownloadService>, tempfile::TempDir) {
    let (service, temp_dir) =
        crate::service::test_helpers::create_test_service(policy, limit_bps).await;
    (Arc::new(service), temp_dir)
}

/// Router over an unthrottled service
async fn test_app() -> (Router, Arc<DownloadService>, tempfile::TempDir) {
    let (service, temp_dir) = create_test_service(ThrottlePolicy::Global, None).await;
    let app = create_router(service.clone(), service.get_config());
    (app, service, temp_dir)
}

async fn get(app: Router, uri: &str) -> axum::response::Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let (service, _temp_dir) = create_test_service(ThrottlePolicy::Global, None).await;

    // Port 0 = OS assigns a free port
    let mut config = (*service.config).clone();
    config.server.bind_address = "127.0.0.1:0".parse().unwrap();
    let config = Arc::new(config);

    let api_handle = tokio::spawn({
        let service = service.clone();
        let config = config.clone();
        async move { start_api_server(service, config).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server should still be running");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let (service, _temp_dir) = create_test_service(ThrottlePolicy::Global, None).await;

    let mut config = (*service.config).clone();
    config.server.cors_enabled = true;
    config.server.cors_origins = vec!["*".to_string()];
    let app = create_router(service, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let (service, _temp_dir) = create_test_service(ThrottlePolicy::Global, None).await;

    let mut config = (*service.config).clone();
    config.server.cors_enabled = false;
    let app = create_router(service, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[test]
fn cors_layer_accepts_specific_origins() {
    // invalid entries are skipped rather than failing the whole list
    let _layer = build_cors_layer(&[
        "http://localhost:3000".to_string(),
        "not a header\u{7f}".to_string(),
    ]);
}
