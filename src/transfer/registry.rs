//! Bookkeeping for in-flight transfers
//!
//! Tracks which transfers are open (so shutdown can complete them), the
//! aggregate byte count, and publishes transfer events.

use crate::transport::AsyncContext;
use crate::types::{Event, RequestId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// How a transfer ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The context completed normally (source exhausted or completed explicitly)
    Completed,
    /// The transfer was aborted after a failure (chunk I/O, gate, or transport)
    Failed(String),
    /// The transport timed the context out
    TimedOut,
}

/// Registry of open transfers
pub struct TransferRegistry {
    active: Mutex<HashMap<RequestId, AsyncContext>>,
    bytes_sent: AtomicU64,
    event_tx: broadcast::Sender<Event>,
}

impl std::fmt::Debug for TransferRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRegistry")
            .field("active", &self.active_count())
            .field("bytes_sent", &self.bytes_sent())
            .finish()
    }
}

impl TransferRegistry {
    /// Create a registry whose event channel buffers `event_buffer` events
    pub fn new(event_buffer: usize) -> Self {
        let (event_tx, _rx) = broadcast::channel(event_buffer.max(1));
        Self {
            active: Mutex::new(HashMap::new()),
            bytes_sent: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Subscribe to transfer events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Record a newly admitted transfer
    pub fn register(&self, ctx: AsyncContext, path: &str, size: u64) {
        let id = ctx.request().request_id();
        if let Ok(mut active) = self.active.lock() {
            active.insert(id, ctx);
        }
        self.emit(Event::TransferStarted {
            id,
            path: path.to_string(),
            size,
        });
    }

    /// Account for bytes written to a client
    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Forget a terminated transfer and publish how it ended
    pub fn finish(&self, id: RequestId, outcome: Outcome, bytes_sent: u64, chunks: u64) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&id);
        }
        let event = match outcome {
            Outcome::Completed => Event::TransferCompleted {
                id,
                bytes_sent,
                chunks,
            },
            Outcome::TimedOut => Event::TransferTimedOut { id, bytes_sent },
            Outcome::Failed(error) => Event::TransferFailed { id, error },
        };
        self.emit(event);
    }

    /// Number of open transfers
    pub fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Contexts of all open transfers
    pub fn active_contexts(&self) -> Vec<AsyncContext> {
        self.active
            .lock()
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Bytes written to clients since the registry was created
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}
