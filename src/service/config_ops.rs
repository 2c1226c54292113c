//! Runtime configuration updates: the aggregate bandwidth limit.

use super::DownloadService;
use crate::config::ThrottlePolicy;
use crate::error::{Error, Result};
use crate::types::Event;

impl DownloadService {
    /// Get the current aggregate bandwidth limit
    ///
    /// Returns the limit in bytes per second, or None if unlimited or the
    /// configured policy has no aggregate limit.
    pub fn get_speed_limit(&self) -> Option<u64> {
        self.gate.limit_bps()
    }

    /// Set the aggregate bandwidth limit
    ///
    /// The change applies to the next permit request of every transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configured gate has no adjustable
    /// aggregate limit (per-request or unlimited policies).
    pub async fn set_speed_limit(&self, limit_bps: Option<u64>) -> Result<()> {
        if !self.gate.set_limit(limit_bps) {
            let policy = match self.config.throttle.policy {
                ThrottlePolicy::Global => "global",
                ThrottlePolicy::PerRequest => "per_request",
                ThrottlePolicy::Unlimited => "unlimited",
            };
            return Err(Error::config(
                "throttle.policy",
                format!("the {policy} policy has no adjustable aggregate limit"),
            ));
        }

        self.emit_event(Event::SpeedLimitChanged { limit_bps });

        tracing::info!(
            limit_bps = ?limit_bps,
            "Speed limit changed"
        );
        Ok(())
    }
}
