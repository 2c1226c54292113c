//! Application state for the API server

use crate::{Config, DownloadService};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clone).
#[derive(Clone)]
pub struct AppState {
    /// The download service
    pub service: Arc<DownloadService>,

    /// Configuration (for read access, runtime updates go through the service)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(service: Arc<DownloadService>, config: Arc<Config>) -> Self {
        Self { service, config }
    }
}
