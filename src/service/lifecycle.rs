//! Shutdown coordination.

use super::DownloadService;
use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;

impl DownloadService {
    /// Gracefully shut down the service
    ///
    /// 1. Stops admitting new transfers (requests get [`crate::Error::ShuttingDown`])
    /// 2. Completes every open transfer through its normal cleanup path
    /// 3. Stops the worker pool; queued chunk activations are dropped
    /// 4. Completes any transfer admitted while steps 2 and 3 ran
    /// 5. Emits [`Event::Shutdown`]
    ///
    /// Calling it again is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        if !self.accepting_new.swap(false, Ordering::SeqCst) {
            tracing::debug!("Shutdown already in progress");
            return Ok(());
        }
        tracing::info!("Stopped accepting new transfers");

        let active = self.registry.active_contexts();
        tracing::info!(active_count = active.len(), "Completing open transfers");
        for ctx in active {
            ctx.complete().await;
        }

        self.pool.shutdown().await;

        // Transfers admitted while the first pass ran lost their queued
        // activation with the pool; later admissions fail to schedule and
        // complete themselves.
        for ctx in self.registry.active_contexts() {
            ctx.complete().await;
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
