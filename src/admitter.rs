//! Request admission: from an inbound download request to a scheduled transfer
//!
//! [`RequestAdmitter::handle`] assigns the sequence number, resolves and opens
//! the file, starts the async context and hands the first chunk to the worker
//! pool. It returns the streaming response immediately; the transfer itself
//! runs on the pool.

use crate::error::{Error, Result};
use crate::token_bucket::AdmissionGate;
use crate::transfer::{ChunkTask, Transfer, TransferListener, TransferRegistry};
use crate::transport::{AsyncContext, TransferContext};
use crate::types::{RequestCounter, RequestId};
use crate::worker_pool::WorkerPool;
use async_trait::async_trait;
use axum::http::{StatusCode, Uri, header};
use axum::response::Response;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

/// Response header carrying the transfer's sequence number
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Maps a requested path to a file on disk
#[async_trait]
pub trait PathResolver: Send + Sync {
    /// Resolve `requested` to a readable regular file
    ///
    /// Returns [`Error::InvalidPath`] for paths that must never be served and
    /// [`Error::NotFound`] when nothing servable exists at the path.
    async fn resolve(&self, requested: &str) -> Result<PathBuf>;
}

/// Serves files below a root directory
#[derive(Clone, Debug)]
pub struct RootDirResolver {
    root: PathBuf,
}

impl RootDirResolver {
    /// Resolve paths relative to `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory files are served from
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl PathResolver for RootDirResolver {
    async fn resolve(&self, requested: &str) -> Result<PathBuf> {
        let relative = Path::new(requested);
        let invalid = |reason: &str| Error::InvalidPath {
            path: relative.to_path_buf(),
            reason: reason.to_string(),
        };

        if requested.is_empty() {
            return Err(invalid("empty path"));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(invalid("parent directory references are not allowed"));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("absolute paths are not allowed"));
                }
            }
        }

        let full = self.root.join(relative);
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(full),
            Ok(_) => Err(Error::NotFound(requested.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(requested.to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Accepts download requests and schedules their transfers
pub struct RequestAdmitter {
    counter: RequestCounter,
    resolver: Arc<dyn PathResolver>,
    gate: Arc<dyn AdmissionGate>,
    pool: WorkerPool,
    registry: Arc<TransferRegistry>,
    async_timeout: Duration,
    denied_retry_delay: Duration,
}

impl std::fmt::Debug for RequestAdmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAdmitter")
            .field("last_request_id", &self.counter.last_issued())
            .field("async_timeout", &self.async_timeout)
            .field("denied_retry_delay", &self.denied_retry_delay)
            .finish()
    }
}

impl RequestAdmitter {
    /// Create an admitter scheduling transfers on `pool`
    pub fn new(
        resolver: Arc<dyn PathResolver>,
        gate: Arc<dyn AdmissionGate>,
        pool: WorkerPool,
        registry: Arc<TransferRegistry>,
        async_timeout: Duration,
    ) -> Self {
        Self {
            counter: RequestCounter::new(),
            resolver,
            gate,
            pool,
            registry,
            async_timeout,
            denied_retry_delay: Duration::ZERO,
        }
    }

    /// Delay before a transfer denied a permit asks again (zero = re-queue immediately)
    pub fn with_denied_retry_delay(mut self, delay: Duration) -> Self {
        self.denied_retry_delay = delay;
        self
    }

    /// Sequence number most recently assigned
    pub fn last_request_id(&self) -> u64 {
        self.counter.last_issued()
    }

    /// Admit a download of `path` requested at `uri`
    ///
    /// Returns as soon as the first chunk is scheduled. Fails if the file
    /// cannot be resolved or opened, or with [`Error::ShuttingDown`] if the
    /// worker pool has stopped.
    pub async fn handle(&self, path: &str, uri: Uri) -> Result<Response> {
        let request_id = self.counter.next_id();
        let request = TransferContext::new(request_id, uri);
        tracing::info!(%request_id, path, "Serving");

        let file_path = self.resolver.resolve(path).await?;
        let file = tokio::fs::File::open(&file_path).await?;
        let size = file.metadata().await?.len();
        let reader = BufReader::with_capacity(self.gate.permit_size().max(1), file);

        let (ctx, body) = AsyncContext::start(request, self.async_timeout);
        let transfer = Arc::new(Transfer::new(
            ctx.clone(),
            self.gate.clone(),
            Box::new(reader),
            Some(size),
            self.registry.clone(),
        ));
        ctx.add_listener(Arc::new(TransferListener::new(transfer.clone())))
            .await;
        self.registry.register(ctx.clone(), path, size);

        let scheduled = self.pool.submit(Box::new(ChunkTask::new(
            transfer.clone(),
            self.pool.clone(),
            self.denied_retry_delay,
        )));
        if !scheduled {
            // The pool stopped while the file was being opened.
            tracing::debug!(%request_id, "Worker pool stopped, abandoning admitted transfer");
            transfer.record_failure(&Error::ShuttingDown);
            ctx.complete().await;
            return Err(Error::ShuttingDown);
        }

        build_response(request_id, size, body)
    }
}

fn build_response(request_id: RequestId, size: u64, body: axum::body::Body) -> Result<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, size)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(REQUEST_ID_HEADER, request_id.get())
        .body(body)
        .map_err(|e| Error::Other(format!("failed to build response: {e}")))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_bucket::{GlobalTokenBucket, UnlimitedGate};
    use crate::types::Event;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, RootDirResolver) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ten.bin"), b"0123456789").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/inner.txt"), b"inner").unwrap();
        let resolver = RootDirResolver::new(dir.path());
        (dir, resolver)
    }

    fn admitter(resolver: RootDirResolver, gate: Arc<dyn AdmissionGate>) -> RequestAdmitter {
        RequestAdmitter::new(
            Arc::new(resolver),
            gate,
            WorkerPool::new(2),
            Arc::new(TransferRegistry::new(16)),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn resolver_finds_nested_files() {
        let (dir, resolver) = fixture();
        let found = resolver.resolve("nested/inner.txt").await.unwrap();
        assert_eq!(found, dir.path().join("nested/inner.txt"));
    }

    #[tokio::test]
    async fn resolver_rejects_escapes_and_empty_paths() {
        let (_dir, resolver) = fixture();
        for bad in ["", "../etc/passwd", "nested/../../x", "/etc/passwd"] {
            assert!(
                matches!(resolver.resolve(bad).await, Err(Error::InvalidPath { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn resolver_reports_missing_files_and_directories() {
        let (_dir, resolver) = fixture();
        assert!(matches!(
            resolver.resolve("missing.bin").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            resolver.resolve("nested").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn handle_streams_file_with_declared_length() {
        let (_dir, resolver) = fixture();
        let admitter = admitter(resolver, Arc::new(UnlimitedGate::new(4)));

        let response = admitter
            .handle("ten.bin", Uri::from_static("/download/ten.bin"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "1");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"0123456789");
    }

    #[tokio::test]
    async fn each_request_gets_the_next_sequence_number() {
        let (_dir, resolver) = fixture();
        let admitter = admitter(resolver, Arc::new(GlobalTokenBucket::new(None, 4)));

        for expected in 1..=3 {
            let response = admitter
                .handle("ten.bin", Uri::from_static("/download/ten.bin"))
                .await
                .unwrap();
            assert_eq!(
                response.headers()[REQUEST_ID_HEADER],
                expected.to_string().as_str()
            );
        }
        assert_eq!(admitter.last_request_id(), 3);
    }

    #[tokio::test]
    async fn missing_file_fails_without_registering_a_transfer() {
        let (_dir, resolver) = fixture();
        let registry = Arc::new(TransferRegistry::new(16));
        let mut events = registry.subscribe();
        let admitter = RequestAdmitter::new(
            Arc::new(resolver),
            Arc::new(UnlimitedGate::new(4)),
            WorkerPool::new(1),
            registry.clone(),
            Duration::from_secs(60),
        );

        let result = admitter
            .handle("nope.bin", Uri::from_static("/download/nope.bin"))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(registry.active_count(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn admitted_transfer_is_registered_and_announced() {
        let (_dir, resolver) = fixture();
        let registry = Arc::new(TransferRegistry::new(16));
        let mut events = registry.subscribe();
        let admitter = RequestAdmitter::new(
            Arc::new(resolver),
            Arc::new(UnlimitedGate::new(4)),
            WorkerPool::new(1),
            registry.clone(),
            Duration::from_secs(60),
        );

        let response = admitter
            .handle("ten.bin", Uri::from_static("/download/ten.bin"))
            .await
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            Event::TransferStarted {
                id: RequestId(1),
                path: "ten.bin".into(),
                size: 10,
            }
        );

        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::TransferCompleted { bytes_sent: 10, chunks: 3, .. }
        ));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn stopped_pool_rejects_and_cleans_up_the_admitted_transfer() {
        let (_dir, resolver) = fixture();
        let registry = Arc::new(TransferRegistry::new(16));
        let mut events = registry.subscribe();
        let pool = WorkerPool::new(1);
        pool.shutdown().await;
        let admitter = RequestAdmitter::new(
            Arc::new(resolver),
            Arc::new(UnlimitedGate::new(4)),
            pool,
            registry.clone(),
            Duration::from_secs(60),
        );

        let result = admitter
            .handle("ten.bin", Uri::from_static("/download/ten.bin"))
            .await;
        assert!(matches!(result, Err(Error::ShuttingDown)));
        assert_eq!(registry.active_count(), 0);

        assert!(matches!(
            events.recv().await.unwrap(),
            Event::TransferStarted { .. }
        ));
        match events.recv().await.unwrap() {
            Event::TransferFailed { id, error } => {
                assert_eq!(id, RequestId(1));
                assert!(error.contains("shutdown in progress"), "{error}");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
