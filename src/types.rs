//! Core types for throttled-dl

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

/// Sequence number identifying one transfer
///
/// Assigned at admission from a process-wide counter starting at 1 and never
/// reused. Admission gates key their per-transfer bookkeeping by this value,
/// and it is echoed to the client in the `x-request-id` response header.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of [`RequestId`]s
#[derive(Debug, Default)]
pub struct RequestCounter {
    last: AtomicU64,
}

impl RequestCounter {
    /// Create a counter whose first issued id is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next id
    pub fn next_id(&self) -> RequestId {
        RequestId(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently issued id value (0 before the first request)
    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

/// Events emitted by the service
///
/// Consumers subscribe through [`crate::DownloadService::subscribe`] or the
/// `/events` SSE stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A transfer was admitted and its first chunk scheduled
    TransferStarted {
        /// Transfer sequence number
        id: RequestId,
        /// Requested path
        path: String,
        /// Declared content length in bytes
        size: u64,
    },

    /// The source was fully sent (or the transfer was completed explicitly)
    TransferCompleted {
        /// Transfer sequence number
        id: RequestId,
        /// Bytes written to the client
        bytes_sent: u64,
        /// Number of chunk writes
        chunks: u64,
    },

    /// The transport timed the transfer out
    TransferTimedOut {
        /// Transfer sequence number
        id: RequestId,
        /// Bytes written before the timeout
        bytes_sent: u64,
    },

    /// The transport reported an error (usually a client disconnect)
    TransferFailed {
        /// Transfer sequence number
        id: RequestId,
        /// Error message
        error: String,
    },

    /// The global bandwidth limit changed
    SpeedLimitChanged {
        /// New limit in bytes per second (None = unlimited)
        limit_bps: Option<u64>,
    },

    /// The service is shutting down
    Shutdown,
}

impl Event {
    /// Short event name used as the SSE event type
    pub fn kind(&self) -> &'static str {
        match self {
            Event::TransferStarted { .. } => "transfer_started",
            Event::TransferCompleted { .. } => "transfer_completed",
            Event::TransferTimedOut { .. } => "transfer_timed_out",
            Event::TransferFailed { .. } => "transfer_failed",
            Event::SpeedLimitChanged { .. } => "speed_limit_changed",
            Event::Shutdown => "shutdown",
        }
    }
}

/// Point-in-time service statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ServiceStats {
    /// Chunk activations waiting in the worker pool queue
    pub awaiting_chunks: usize,
    /// Transfers admitted and not yet terminated
    pub active_transfers: usize,
    /// Sequence number most recently assigned to a download request
    pub total_admitted: u64,
    /// Bytes written to clients since startup
    pub bytes_sent: u64,
    /// Global bandwidth limit (None = unlimited or not a global gate)
    pub limit_bps: Option<u64>,
    /// Chunk size in bytes
    pub permit_size: usize,
}
