//! Per-identity rate limiting for the ingestion endpoint.
//!
//! Counters are keyed by source identity (merchant id header when present,
//! else peer IP) with independent fixed windows, default 100 requests per
//! minute. Check-and-increment is atomic through the state store, so
//! concurrent ingestion requests cannot slip past the limit together.
//!
//! Configure via `INFLOW_RATE_LIMIT_RPM`.

use std::sync::Arc;
use std::time::Duration;

use crate::store::StateStore;

pub struct RateLimiter {
    store: Arc<dyn StateStore>,
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn StateStore>, limit_per_window: u64, window: Duration) -> Self {
        assert!(limit_per_window > 0, "Rate limit must be greater than 0");
        Self {
            store,
            limit: limit_per_window,
            window,
        }
    }

    /// Limiter with the default one-minute window.
    pub fn per_minute(store: Arc<dyn StateStore>, limit: u64) -> Self {
        Self::new(store, limit, Duration::from_secs(60))
    }

    /// Returns true if the request from `identifier` is within its limit.
    /// Counting and checking happen in one atomic step; a rejected request
    /// still consumes a slot in the window.
    pub fn allow(&self, identifier: &str) -> bool {
        let count = self
            .store
            .increment_window(&format!("rate:{}", identifier), self.window);
        count <= self.limit
    }
}
