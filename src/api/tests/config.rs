use super::*;

#[tokio::test]
async fn test_get_config_endpoint() {
    let (app, service, _temp_dir) = test_app().await;

    let response = get(app, "/config").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["throttle"]["permit_size"], 4);
    assert_eq!(json["transfer"]["workers"], 2);
    assert_eq!(
        json["files"]["root_dir"],
        service.config.files.root_dir.display().to_string()
    );
}

#[tokio::test]
async fn test_speed_limit_round_trip() {
    let (service, _temp_dir) = create_test_service(ThrottlePolicy::Global, Some(1_000)).await;
    let app = create_router(service.clone(), service.get_config());

    let response = get(app.clone(), "/config/speed-limit").await;
    assert_eq!(body_json(response).await["limit_bps"], 1_000);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/config/speed-limit")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"limit_bps": 2048}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(service.get_speed_limit(), Some(2048));

    let response = get(app, "/config/speed-limit").await;
    assert_eq!(body_json(response).await["limit_bps"], 2048);
}

#[tokio::test]
async fn test_speed_limit_null_means_unlimited() {
    let (service, _temp_dir) = create_test_service(ThrottlePolicy::Global, Some(1_000)).await;
    let app = create_router(service.clone(), service.get_config());

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/config/speed-limit")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"limit_bps": null}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(service.get_speed_limit(), None);
}

#[tokio::test]
async fn test_speed_limit_rejected_for_unlimited_policy() {
    let (service, _temp_dir) = create_test_service(ThrottlePolicy::Unlimited, None).await;
    let app = create_router(service.clone(), service.get_config());

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/config/speed-limit")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"limit_bps": 10}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "config_error");
    assert_eq!(json["error"]["details"]["key"], "throttle.policy");
}
