//! The download service facade, split into focused submodules.
//!
//! [`DownloadService`] wires the admission gate, worker pool, transfer
//! registry and request admitter together:
//! - [`config_ops`] - Runtime bandwidth limit changes
//! - [`lifecycle`] - Shutdown coordination

mod config_ops;
mod lifecycle;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use crate::admitter::{PathResolver, RequestAdmitter, RootDirResolver};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::token_bucket::{self, AdmissionGate};
use crate::transfer::TransferRegistry;
use crate::types::{Event, ServiceStats};
use crate::worker_pool::WorkerPool;
use axum::http::Uri;
use axum::response::Response;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Main service instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct DownloadService {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Admission gate shared by every transfer
    pub(crate) gate: Arc<dyn AdmissionGate>,
    /// Worker pool running chunk activations
    pub(crate) pool: WorkerPool,
    /// Open transfers, byte counter and event channel
    pub(crate) registry: Arc<TransferRegistry>,
    /// Request admitter (owns the sequence counter)
    pub(crate) admitter: Arc<RequestAdmitter>,
    /// Flag to indicate whether new transfers are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl std::fmt::Debug for DownloadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadService")
            .field("pool", &self.pool)
            .field("registry", &self.registry)
            .field("accepting_new", &self.accepting_new.load(Ordering::SeqCst))
            .finish()
    }
}

impl DownloadService {
    /// Create a service serving files from `config.files.root_dir`
    ///
    /// Validates the configuration, creates the root directory if needed,
    /// builds the admission gate selected by the throttle policy and starts
    /// the worker pool. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the root
    /// directory cannot be created.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.files.root_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create root directory '{}': {}",
                        config.files.root_dir.display(),
                        e
                    ),
                ))
            })?;

        let resolver = Arc::new(RootDirResolver::new(config.files.root_dir.clone()));
        let gate = token_bucket::from_config(&config.throttle);
        Ok(Self::with_components(config, resolver, gate))
    }

    /// Create a service from explicit collaborators
    ///
    /// Skips validation and filesystem setup; used for custom path resolution
    /// or admission policies.
    pub fn with_components(
        config: Config,
        resolver: Arc<dyn PathResolver>,
        gate: Arc<dyn AdmissionGate>,
    ) -> Self {
        let pool = WorkerPool::new(config.transfer.workers);
        let registry = Arc::new(TransferRegistry::new(config.transfer.event_buffer));
        let admitter = RequestAdmitter::new(
            resolver,
            gate.clone(),
            pool.clone(),
            registry.clone(),
            config.transfer.async_timeout,
        )
        .with_denied_retry_delay(config.transfer.denied_retry_delay);

        tracing::info!(
            workers = pool.workers(),
            permit_size = gate.permit_size(),
            limit_bps = ?gate.limit_bps(),
            "Download service ready"
        );

        Self {
            config: Arc::new(config),
            gate,
            pool,
            registry,
            admitter: Arc::new(admitter),
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Admit a download of `path`, returning the streaming response
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] once shutdown has begun, otherwise whatever
    /// resolving or opening the file fails with.
    pub async fn serve(&self, path: &str, uri: Uri) -> Result<Response> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        self.admitter.handle(path, uri).await
    }

    /// Subscribe to service events
    ///
    /// Returns a broadcast receiver that will receive all events emitted by
    /// the service. Lagging receivers skip events rather than blocking
    /// transfers.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.registry.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Point-in-time statistics
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            awaiting_chunks: self.pool.queue_depth(),
            active_transfers: self.registry.active_count(),
            total_admitted: self.admitter.last_request_id(),
            bytes_sent: self.registry.bytes_sent(),
            limit_bps: self.gate.limit_bps(),
            permit_size: self.gate.permit_size(),
        }
    }

    /// Whether new transfers are being admitted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    pub(crate) fn emit_event(&self, event: Event) {
        self.registry.emit(event);
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let service = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(service, config).await })
    }
}
