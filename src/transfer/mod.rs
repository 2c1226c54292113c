//! Chunked, gate-throttled transfer of one byte source to one client
//!
//! A [`Transfer`] owns the open source, its transmit buffer and counters.
//! Two capabilities share it through an `Arc`:
//! - [`ChunkTask`] - the pool task that asks the gate for a permit and, when
//!   granted, sends one buffer's worth of bytes, then re-queues itself
//! - [`TransferListener`] - the lifecycle listener that closes the source and
//!   releases the gate's bookkeeping when the context terminates
//!
//! Cleanup is guarded by a single atomic flag: whichever terminal path gets
//! there first closes the source and calls [`AdmissionGate::completed`];
//! every later path, and every task activation still queued, is a no-op.

use crate::error::{Error, Result};
use crate::token_bucket::AdmissionGate;
use crate::transport::AsyncContext;
use crate::types::RequestId;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

mod chunk_task;
mod listener;
mod registry;

pub use chunk_task::ChunkTask;
pub use listener::TransferListener;
pub use registry::{Outcome, TransferRegistry};

/// Readable byte stream served by a transfer
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Where a transfer is in its life
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferState {
    /// Waiting for its next permit request to run
    AwaitingAdmission = 0,
    /// Permit granted, chunk being read and written
    Admitted = 1,
    /// Permit denied, task re-queued unchanged
    Resubmitted = 2,
    /// Terminated; source closed and gate released
    Completed = 3,
}

impl TransferState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransferState::AwaitingAdmission,
            1 => TransferState::Admitted,
            2 => TransferState::Resubmitted,
            3 => TransferState::Completed,
            // only `set_state` writes the cell, always from a variant
            other => unreachable!("invalid transfer state {other}"),
        }
    }
}

/// Result of one scheduler activation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// The gate denied a permit; nothing was read or written
    Denied,
    /// One full chunk was written and more remain
    Sent,
    /// The source is exhausted; the context should be completed
    Exhausted,
    /// The transfer was already cleaned up; nothing happened
    Finished,
}

struct ChunkSource {
    reader: ByteSource,
    buffer: Box<[u8]>,
}

impl ChunkSource {
    /// Fill the buffer, stopping early only at end of stream
    async fn read_chunk(&mut self) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            let n = self.reader.read(&mut self.buffer[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// State of one in-flight download
pub struct Transfer {
    request_id: RequestId,
    ctx: AsyncContext,
    gate: Arc<dyn AdmissionGate>,
    registry: Arc<TransferRegistry>,
    source: Mutex<Option<ChunkSource>>,
    content_length: Option<u64>,
    closed: AtomicBool,
    state: AtomicU8,
    chunks: AtomicU64,
    bytes_sent: AtomicU64,
    failure: std::sync::Mutex<Option<String>>,
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("request_id", &self.request_id)
            .field("state", &self.state())
            .field("chunks", &self.chunks_sent())
            .field("bytes_sent", &self.bytes_sent())
            .finish()
    }
}

impl Transfer {
    /// Create a transfer serving `source` through `ctx`
    ///
    /// The transmit buffer is one permit in size. `content_length`, when
    /// known, lets the transfer finish without asking for a permit it would
    /// only use to discover end of stream.
    pub fn new(
        ctx: AsyncContext,
        gate: Arc<dyn AdmissionGate>,
        source: ByteSource,
        content_length: Option<u64>,
        registry: Arc<TransferRegistry>,
    ) -> Self {
        let buffer = vec![0u8; gate.permit_size().max(1)].into_boxed_slice();
        Self {
            request_id: ctx.request().request_id(),
            ctx,
            gate,
            registry,
            source: Mutex::new(Some(ChunkSource {
                reader: source,
                buffer,
            })),
            content_length,
            closed: AtomicBool::new(false),
            state: AtomicU8::new(TransferState::AwaitingAdmission as u8),
            chunks: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            failure: std::sync::Mutex::new(None),
        }
    }

    /// Sequence number of this transfer
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// The async context this transfer writes to
    pub fn context(&self) -> &AsyncContext {
        &self.ctx
    }

    /// Current state
    pub fn state(&self) -> TransferState {
        TransferState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Number of chunks written so far
    pub fn chunks_sent(&self) -> u64 {
        self.chunks.load(Ordering::SeqCst)
    }

    /// Bytes written so far
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    /// Whether cleanup has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// `Completed` is sticky: a late activation cannot move the state back
    fn set_state(&self, state: TransferState) {
        let completed = TransferState::Completed as u8;
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != completed).then_some(state as u8)
            });
    }

    fn fully_sent(&self) -> bool {
        self.content_length
            .is_some_and(|len| self.bytes_sent() >= len)
    }

    /// One scheduler activation: ask the gate, and if admitted send one chunk
    ///
    /// An activation that starts after the context terminated never reaches
    /// the gate. One that was already inside the gate when cleanup ran
    /// releases the gate again, so bookkeeping the gate created for it does
    /// not outlive the transfer.
    pub async fn step(&self) -> Result<Step> {
        if self.is_closed() || self.ctx.is_terminated() {
            return Ok(Step::Finished);
        }
        if self.fully_sent() {
            return Ok(Step::Exhausted);
        }

        self.set_state(TransferState::AwaitingAdmission);
        let admitted = self.gate.try_take(self.ctx.request())?;
        if self.is_closed() {
            self.gate.completed(self.ctx.request());
            return Ok(Step::Finished);
        }
        if !admitted {
            self.set_state(TransferState::Resubmitted);
            return Ok(Step::Denied);
        }
        self.set_state(TransferState::Admitted);

        let (chunk, short_read) = {
            let mut source = self.source.lock().await;
            let Some(source) = source.as_mut() else {
                return Ok(Step::Finished);
            };
            let n = source.read_chunk().await?;
            (
                Bytes::copy_from_slice(&source.buffer[..n]),
                n < source.buffer.len(),
            )
        };

        if chunk.is_empty() {
            return Ok(Step::Exhausted);
        }

        let len = chunk.len() as u64;
        tracing::trace!(
            request_id = %self.request_id,
            chunk = self.chunks_sent(),
            bytes = len,
            "Sending chunk"
        );
        self.ctx.write(chunk).await?;

        self.chunks.fetch_add(1, Ordering::SeqCst);
        self.bytes_sent.fetch_add(len, Ordering::SeqCst);
        self.registry.record_bytes(len);

        if short_read || self.fully_sent() {
            Ok(Step::Exhausted)
        } else {
            Ok(Step::Sent)
        }
    }

    /// Remember why the transfer is being aborted, reported at cleanup
    pub(crate) fn record_failure(&self, error: &Error) {
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert_with(|| error.to_string());
        }
    }

    /// Close the source and release the gate, exactly once
    ///
    /// Returns false if cleanup had already run.
    pub async fn cleanup(&self, outcome: Outcome) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.set_state(TransferState::Completed);

        // Dropping the reader closes the underlying file.
        drop(self.source.lock().await.take());
        self.gate.completed(self.ctx.request());

        let outcome = match outcome {
            Outcome::Completed => match self.failure.lock().ok().and_then(|mut f| f.take()) {
                Some(error) => Outcome::Failed(error),
                None => Outcome::Completed,
            },
            other => other,
        };
        self.registry.finish(
            self.request_id,
            outcome,
            self.bytes_sent(),
            self.chunks_sent(),
        );
        tracing::debug!(
            request_id = %self.request_id,
            chunks = self.chunks_sent(),
            bytes = self.bytes_sent(),
            "Done"
        );
        true
    }
}
