//! Shared test helpers for creating DownloadService instances in tests.

use crate::config::{Config, ThrottlePolicy};
use crate::service::DownloadService;
use std::time::Duration;
use tempfile::tempdir;

/// Helper to create a test DownloadService serving from a temp directory.
/// Returns the service and the tempdir (which must be kept alive).
pub(crate) async fn create_test_service(
    policy: ThrottlePolicy,
    limit_bps: Option<u64>,
) -> (DownloadService, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();

    let mut config = Config::default();
    config.files.root_dir = temp_dir.path().join("files");
    config.transfer.workers = 2;
    config.transfer.async_timeout = Duration::from_secs(60);
    config.transfer.denied_retry_delay = Duration::from_millis(1);
    config.throttle.policy = policy;
    config.throttle.permit_size = 4;
    match policy {
        ThrottlePolicy::PerRequest => config.throttle.per_request_limit_bps = limit_bps,
        _ => config.throttle.limit_bps = limit_bps,
    }

    let service = DownloadService::new(config).await.unwrap();
    (service, temp_dir)
}

/// Write `contents` to `name` below the service's root directory
pub(crate) fn write_file(service: &DownloadService, name: &str, contents: &[u8]) {
    let path = service.config.files.root_dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}
