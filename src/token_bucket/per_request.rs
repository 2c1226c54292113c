//! One token bucket per transfer
//!
//! Each transfer gets its own bucket refilled at the per-request rate, so a
//! single download can never exceed its share regardless of how idle the
//! server is. Buckets are created on a transfer's first permit request and
//! dropped by [`AdmissionGate::completed`].

use super::AdmissionGate;
use crate::error::{Error, Result};
use crate::transport::TransferContext;
use crate::types::RequestId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64, cost: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;

        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// Per-transfer bandwidth limiter
pub struct PerRequestTokenBucket {
    /// Per-transfer rate in bytes per second (0 = unlimited)
    rate_bps: u64,
    permit_size: usize,
    buckets: Mutex<HashMap<RequestId, Bucket>>,
}

impl std::fmt::Debug for PerRequestTokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerRequestTokenBucket")
            .field("rate_bps", &self.rate_bps)
            .field("permit_size", &self.permit_size)
            .field("tracked", &self.tracked())
            .finish()
    }
}

impl PerRequestTokenBucket {
    /// Create a limiter granting each transfer `rate_bps` bytes per second
    pub fn new(rate_bps: u64, permit_size: usize) -> Self {
        Self {
            rate_bps,
            permit_size,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Number of transfers with a live bucket
    pub fn tracked(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn capacity(&self) -> f64 {
        self.rate_bps.max(self.permit_size as u64) as f64
    }
}

impl AdmissionGate for PerRequestTokenBucket {
    fn try_take(&self, transfer: &TransferContext) -> Result<bool> {
        if self.rate_bps == 0 {
            return Ok(true);
        }

        let capacity = self.capacity();
        let mut buckets = self
            .buckets
            .lock()
            .map_err(|_| Error::Admission("per-request bucket table poisoned".into()))?;
        let bucket = buckets
            .entry(transfer.request_id())
            .or_insert_with(|| Bucket::full(capacity));

        Ok(bucket.try_consume(self.rate_bps as f64, capacity, self.permit_size as f64))
    }

    fn completed(&self, transfer: &TransferContext) {
        if let Ok(mut buckets) = self.buckets.lock() {
            if buckets.remove(&transfer.request_id()).is_some() {
                tracing::trace!(request_id = %transfer.request_id(), "Released per-request bucket");
            }
        }
    }

    fn permit_size(&self) -> usize {
        self.permit_size
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Uri;
    use std::time::Duration;

    fn transfer(id: u64) -> TransferContext {
        TransferContext::new(RequestId(id), Uri::from_static("/download/x"))
    }

    #[test]
    fn transfers_do_not_share_budget() {
        let gate = PerRequestTokenBucket::new(4096, 4096);

        assert!(gate.try_take(&transfer(1)).unwrap());
        assert!(!gate.try_take(&transfer(1)).unwrap());

        // a second transfer starts with its own full bucket
        assert!(gate.try_take(&transfer(2)).unwrap());
        assert_eq!(gate.tracked(), 2);
    }

    #[test]
    fn completed_drops_bookkeeping_and_is_idempotent() {
        let gate = PerRequestTokenBucket::new(4096, 4096);
        gate.try_take(&transfer(7)).unwrap();
        assert_eq!(gate.tracked(), 1);

        gate.completed(&transfer(7));
        gate.completed(&transfer(7));
        assert_eq!(gate.tracked(), 0);

        // unknown transfers are fine too
        gate.completed(&transfer(99));
    }

    #[test]
    fn bucket_refills_at_the_per_request_rate() {
        let gate = PerRequestTokenBucket::new(40_960, 4096);
        while gate.try_take(&transfer(1)).unwrap() {}

        std::thread::sleep(Duration::from_millis(150));
        assert!(gate.try_take(&transfer(1)).unwrap());
    }

    #[test]
    fn zero_rate_is_unlimited_and_tracks_nothing() {
        let gate = PerRequestTokenBucket::new(0, 4096);
        for _ in 0..100 {
            assert!(gate.try_take(&transfer(1)).unwrap());
        }
        assert_eq!(gate.tracked(), 0);
    }
}
