//! # throttled-dl
//!
//! Chunked file download server throttled by a shared bandwidth budget.
//!
//! ## Design
//!
//! Every download is a transfer that sends one permit-sized chunk per
//! admission-gate grant. A denied transfer is re-queued on a bounded worker
//! pool instead of parking a thread, so thousands of slow downloads share a
//! handful of workers. The response is held open by an async context that
//! reports exactly one terminal event (complete, timeout or error), and every
//! terminal path closes the file and releases the gate exactly once.
//!
//! ## Quick Start
//!
//! ```no_run
//! use throttled_dl::{Config, DownloadService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.throttle.limit_bps = Some(1_000_000);
//!
//!     let service = Arc::new(DownloadService::new(config).await?);
//!
//!     // Subscribe to events
//!     let mut events = service.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     throttled_dl::run_with_shutdown(service).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Request admission and path resolution
pub mod admitter;
/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Download service facade (decomposed into focused submodules)
pub mod service;
/// Admission gates (token buckets)
pub mod token_bucket;
/// Chunked transfer scheduling and cleanup
pub mod transfer;
/// Async execution context for held-open responses
pub mod transport;
/// Core types and events
pub mod types;
/// Worker pool executing chunk activations
pub mod worker_pool;

// Re-export commonly used types
pub use admitter::{PathResolver, RequestAdmitter, RootDirResolver};
pub use config::{Config, ThrottleConfig, ThrottlePolicy};
pub use error::{ApiError, Error, ErrorDetail, Result, ToHttpStatus};
pub use service::DownloadService;
pub use token_bucket::{
    AdmissionGate, DEFAULT_PERMIT_SIZE, GlobalTokenBucket, PerRequestTokenBucket, UnlimitedGate,
};
pub use transport::{AsyncContext, LifecycleListener, TransferContext};
pub use types::{Event, RequestId, ServiceStats};
pub use worker_pool::{PoolTask, WorkerPool};

/// Serve the REST API until a termination signal, then shut down gracefully.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Returns early with the server's error if the API server stops on its own
/// (for example when the bind address is taken); the service is shut down
/// either way.
///
/// # Example
///
/// ```no_run
/// use throttled_dl::{DownloadService, Config, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = Arc::new(DownloadService::new(Config::default()).await?);
///     run_with_shutdown(service).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(service: std::sync::Arc<DownloadService>) -> Result<()> {
    let mut server = service.spawn_api_server();

    let server_result = tokio::select! {
        _ = wait_for_signal() => None,
        joined = &mut server => Some(joined),
    };

    service.shutdown().await?;

    match server_result {
        None => {
            server.abort();
            Ok(())
        }
        Some(Ok(result)) => result,
        Some(Err(e)) => Err(Error::ApiServerError(e.to_string())),
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
