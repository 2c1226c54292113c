//! Admission gates deciding whether a transfer may send its next chunk
//!
//! Every chunk costs one permit of [`AdmissionGate::permit_size`] bytes. A
//! gate answers immediately: `true` consumes one permit on behalf of the
//! transfer, `false` has no side effect and the caller retries later.
//! Gates are shared by every transfer and are called concurrently from any
//! worker.

use crate::config::{ThrottleConfig, ThrottlePolicy};
use crate::error::Result;
use crate::transport::TransferContext;
use std::sync::Arc;

mod global;
mod per_request;

pub use global::GlobalTokenBucket;
pub use per_request::PerRequestTokenBucket;

/// Default bytes granted by one permit (and the chunk size)
pub const DEFAULT_PERMIT_SIZE: usize = 4 * 1024;

/// Grants or denies per-chunk transmit budget
pub trait AdmissionGate: Send + Sync {
    /// Try to take one permit for the transfer; never blocks
    fn try_take(&self, transfer: &TransferContext) -> Result<bool>;

    /// Release any bookkeeping held for the transfer; idempotent
    fn completed(&self, transfer: &TransferContext);

    /// Bytes granted by one permit
    fn permit_size(&self) -> usize;

    /// Aggregate limit in bytes per second, if this gate enforces one
    fn limit_bps(&self) -> Option<u64> {
        None
    }

    /// Change the aggregate limit at runtime
    ///
    /// Returns false if the gate has no adjustable aggregate limit.
    fn set_limit(&self, _limit_bps: Option<u64>) -> bool {
        false
    }
}

/// Gate that grants every request
#[derive(Clone, Copy, Debug)]
pub struct UnlimitedGate {
    permit_size: usize,
}

impl UnlimitedGate {
    /// Create an unlimited gate handing out permits of `permit_size` bytes
    pub fn new(permit_size: usize) -> Self {
        Self { permit_size }
    }
}

impl AdmissionGate for UnlimitedGate {
    fn try_take(&self, _transfer: &TransferContext) -> Result<bool> {
        Ok(true)
    }

    fn completed(&self, _transfer: &TransferContext) {}

    fn permit_size(&self) -> usize {
        self.permit_size
    }
}

/// Build the gate selected by the throttle configuration
pub fn from_config(config: &ThrottleConfig) -> Arc<dyn AdmissionGate> {
    match config.policy {
        ThrottlePolicy::Global => {
            Arc::new(GlobalTokenBucket::new(config.limit_bps, config.permit_size))
        }
        ThrottlePolicy::PerRequest => Arc::new(PerRequestTokenBucket::new(
            config.per_request_limit_bps.unwrap_or(0),
            config.permit_size,
        )),
        ThrottlePolicy::Unlimited => Arc::new(UnlimitedGate::new(config.permit_size)),
    }
}
