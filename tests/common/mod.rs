//! Common test utilities for throttled-dl integration tests

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use throttled_dl::{Config, DownloadService, Event, ThrottlePolicy};
use tokio::sync::broadcast;
use tower::ServiceExt;

/// A running service, its router and the directory it serves from
pub struct TestServer {
    pub service: Arc<DownloadService>,
    pub app: Router,
    pub _temp_dir: TempDir,
}

impl TestServer {
    /// Write a file below the served root
    pub fn write_file(&self, name: &str, contents: &[u8]) {
        let path = self.service.get_config().files.root_dir.join(name);
        std::fs::write(path, contents).unwrap();
    }

    /// Issue a GET and return the response
    pub async fn get(&self, uri: &str) -> axum::response::Response {
        self.app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Download a file and return its request id and body
    pub async fn download(&self, name: &str) -> (u64, Vec<u8>) {
        let response = self.get(&format!("/download/{name}")).await;
        assert!(response.status().is_success(), "{}", response.status());
        let id = response.headers()["x-request-id"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (id, body.to_vec())
    }
}

/// Start a service serving from a temp directory with 1 KiB permits
pub async fn start_server(configure: impl FnOnce(&mut Config)) -> TestServer {
    let temp_dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.files.root_dir = temp_dir.path().join("files");
    config.transfer.workers = 4;
    config.throttle.policy = ThrottlePolicy::Global;
    config.throttle.permit_size = 1024;
    configure(&mut config);

    let service = Arc::new(DownloadService::new(config).await.unwrap());
    let app = throttled_dl::api::create_router(service.clone(), service.get_config());
    TestServer {
        service,
        app,
        _temp_dir: temp_dir,
    }
}

/// Deterministic file contents of `len` bytes
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Collect terminal transfer events until `count` have been seen
pub async fn collect_terminal_events(
    events: &mut broadcast::Receiver<Event>,
    count: usize,
    timeout: Duration,
) -> Vec<Event> {
    let mut seen = Vec::new();
    tokio::time::timeout(timeout, async {
        while seen.len() < count {
            match events.recv().await.unwrap() {
                event @ (Event::TransferCompleted { .. }
                | Event::TransferTimedOut { .. }
                | Event::TransferFailed { .. }) => seen.push(event),
                _ => {}
            }
        }
    })
    .await
    .expect("timed out waiting for transfers to finish");
    seen
}
