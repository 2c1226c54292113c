//! Lifecycle listener closing a transfer when its context terminates.

use super::{Outcome, Transfer};
use crate::error::Error;
use crate::transport::LifecycleListener;
use async_trait::async_trait;
use std::sync::Arc;

/// Routes every terminal event of a transfer's context to [`Transfer::cleanup`]
pub struct TransferListener {
    transfer: Arc<Transfer>,
}

impl TransferListener {
    /// Listen on behalf of `transfer`
    pub fn new(transfer: Arc<Transfer>) -> Self {
        Self { transfer }
    }
}

#[async_trait]
impl LifecycleListener for TransferListener {
    async fn on_complete(&self) {
        self.transfer.cleanup(Outcome::Completed).await;
    }

    async fn on_timeout(&self) {
        tracing::warn!(
            request_id = %self.transfer.request_id(),
            "Asynchronous request timeout"
        );
        self.transfer.cleanup(Outcome::TimedOut).await;
    }

    async fn on_error(&self, cause: &Error) {
        tracing::warn!(
            request_id = %self.transfer.request_id(),
            error = %cause,
            "Asynchronous request error"
        );
        self.transfer
            .cleanup(Outcome::Failed(cause.to_string()))
            .await;
    }
}
