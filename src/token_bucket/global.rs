//! One token bucket shared by every transfer
//!
//! Lock-free: tokens and the refill timestamp live in atomics and the
//! bucket is refilled lazily from elapsed time whenever a permit is
//! requested. All concurrent transfers draw from the same bucket, so
//! aggregate throughput never exceeds the configured limit.

use super::AdmissionGate;
use crate::error::Result;
use crate::transport::TransferContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Aggregate bandwidth limiter
///
/// # Algorithm
///
/// - Tokens are bytes; one permit costs `permit_size` tokens
/// - Tokens refill at `limit_bps` per second
/// - Capacity is one second of budget, never less than one permit
/// - A limit of 0 means unlimited: every permit is granted
#[derive(Debug)]
pub struct GlobalTokenBucket {
    /// Speed limit in bytes per second (0 = unlimited)
    limit_bps: AtomicU64,
    /// Available tokens
    tokens: AtomicU64,
    /// Last refill timestamp (nanoseconds since an arbitrary epoch)
    last_refill: AtomicU64,
    permit_size: usize,
}

impl GlobalTokenBucket {
    /// Create a bucket with the given limit (None = unlimited), starting full
    ///
    /// # Examples
    ///
    /// ```
    /// use throttled_dl::token_bucket::{AdmissionGate, GlobalTokenBucket};
    ///
    /// // 1 MB/s in 4 KiB chunks
    /// let bucket = GlobalTokenBucket::new(Some(1_000_000), 4096);
    /// assert_eq!(bucket.limit_bps(), Some(1_000_000));
    /// ```
    #[must_use]
    pub fn new(limit_bps: Option<u64>, permit_size: usize) -> Self {
        let limit = limit_bps.unwrap_or(0);
        let bucket = Self {
            limit_bps: AtomicU64::new(limit),
            tokens: AtomicU64::new(0),
            last_refill: AtomicU64::new(Self::now_nanos()),
            permit_size,
        };
        bucket.tokens.store(bucket.capacity(limit), Ordering::SeqCst);
        bucket
    }

    fn permit(&self) -> u64 {
        self.permit_size as u64
    }

    fn capacity(&self, limit: u64) -> u64 {
        if limit == 0 { 0 } else { limit.max(self.permit()) }
    }

    /// Tokens currently in the bucket (without refilling)
    pub fn available(&self) -> u64 {
        self.tokens.load(Ordering::SeqCst)
    }

    fn refill(&self, limit: u64) {
        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);
        let elapsed_secs = now.saturating_sub(last) as f64 / 1_000_000_000.0;
        let to_add = (limit as f64 * elapsed_secs) as u64;

        if to_add == 0 {
            return;
        }
        // Advance only by the time the whole tokens account for, so the
        // fractional remainder carries over to the next refill.
        let credited = (u128::from(to_add) * 1_000_000_000 / u128::from(limit)) as u64;
        let next = last.saturating_add(credited).min(now);

        // Only the caller that moves the timestamp gets to add the tokens.
        if self
            .last_refill
            .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let capacity = self.capacity(limit);
            let _ = self
                .tokens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some(current.saturating_add(to_add).min(capacity))
                });
        }
    }

    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

impl AdmissionGate for GlobalTokenBucket {
    fn try_take(&self, _transfer: &TransferContext) -> Result<bool> {
        let limit = self.limit_bps.load(Ordering::Relaxed);
        if limit == 0 {
            return Ok(true);
        }

        self.refill(limit);

        let permit = self.permit();
        let taken = self
            .tokens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(permit)
            })
            .is_ok();
        Ok(taken)
    }

    fn completed(&self, _transfer: &TransferContext) {}

    fn permit_size(&self) -> usize {
        self.permit_size
    }

    fn limit_bps(&self) -> Option<u64> {
        let limit = self.limit_bps.load(Ordering::Relaxed);
        if limit == 0 { None } else { Some(limit) }
    }

    /// Takes effect immediately. Raising the limit adds the difference to
    /// the bucket; lowering it leaves excess tokens to be consumed.
    fn set_limit(&self, limit_bps: Option<u64>) -> bool {
        let new_limit = limit_bps.unwrap_or(0);
        let old_limit = self.limit_bps.swap(new_limit, Ordering::SeqCst);

        if old_limit == 0 && new_limit > 0 {
            // Leaving unlimited mode: start from a full bucket and a fresh clock.
            self.last_refill.store(Self::now_nanos(), Ordering::SeqCst);
            self.tokens
                .store(self.capacity(new_limit), Ordering::SeqCst);
        } else if new_limit > old_limit {
            let capacity = self.capacity(new_limit);
            let _ = self
                .tokens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some(current.saturating_add(new_limit - old_limit).min(capacity))
                });
        }
        true
    }
}
