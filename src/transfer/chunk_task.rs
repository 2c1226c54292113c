//! The self-resubmitting chunk scheduler task.

use super::{Step, Transfer};
use crate::error::Error;
use crate::worker_pool::{PoolTask, WorkerPool};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Pool task sending one chunk of a [`Transfer`] per activation
///
/// A denied or unfinished transfer is put back on the pool's queue rather
/// than looping or sleeping, so a throttled transfer occupies no worker
/// between permit requests.
pub struct ChunkTask {
    transfer: Arc<Transfer>,
    pool: WorkerPool,
    denied_retry_delay: Duration,
}

impl ChunkTask {
    /// Create the task; `denied_retry_delay` of zero re-queues denied transfers immediately
    pub fn new(transfer: Arc<Transfer>, pool: WorkerPool, denied_retry_delay: Duration) -> Self {
        Self {
            transfer,
            pool,
            denied_retry_delay,
        }
    }

    /// The transfer this task drives
    pub fn transfer(&self) -> &Arc<Transfer> {
        &self.transfer
    }
}

#[async_trait]
impl PoolTask for ChunkTask {
    async fn run(self: Box<Self>) {
        let ctx = self.transfer.context().clone();
        let request_id = self.transfer.request_id();

        let step = AssertUnwindSafe(self.transfer.step())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(Error::Other(panic_message(payload.as_ref()))));

        match step {
            Ok(Step::Denied) => {
                let pool = self.pool.clone();
                let delay = self.denied_retry_delay;
                if !pool.submit_after(delay, self) {
                    tracing::debug!(%request_id, "Worker pool stopped, completing transfer");
                    ctx.complete().await;
                }
            }
            Ok(Step::Sent) => {
                let pool = self.pool.clone();
                if !pool.submit(self) {
                    tracing::debug!(%request_id, "Worker pool stopped, completing transfer");
                    ctx.complete().await;
                }
            }
            Ok(Step::Exhausted) => ctx.complete().await,
            Ok(Step::Finished) => {
                tracing::trace!(%request_id, "Transfer already closed, dropping activation");
            }
            Err(e) => {
                if ctx.is_terminated() {
                    tracing::debug!(%request_id, error = %e, "Chunk abandoned after transfer ended");
                } else {
                    tracing::error!(
                        %request_id,
                        error = %e,
                        "Error while sending data chunk, aborting"
                    );
                    self.transfer.record_failure(&e);
                }
                ctx.complete().await;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("chunk activation panicked: {detail}")
}
