use std::{num::NonZeroU32, sync::Arc, time::Duration};

use governor::{DefaultDirectRateLimiter, Quota};
use tokio_util::sync::CancellationToken;

use crate::errors::LimiterCancelled;

/// Default burst capacity of the block fetch limiter.
pub const DEFAULT_BURST: u32 = 10;

/// Slowest supported replenish interval; lower rates are raised to it.
const MAX_REPLENISH_PERIOD: Duration = Duration::from_secs(3600);

/// Throttle shared by every block fetcher.
///
/// Clones share the same quota, so a single instance bounds the aggregate
/// throughput of all concurrent fetchers.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    inner: Arc<DefaultDirectRateLimiter>,
}

impl RateLimiter {
    /// Create a limiter replenishing `rate` permits per second (fractional
    /// rates allowed) with room for `burst` permits at once.
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(replenish_period(rate))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);
        Self { inner: Arc::new(governor::RateLimiter::direct(quota)) }
    }

    /// Attempt to take a permit without waiting.
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }

    /// Wait until a permit is available.
    ///
    /// Returns [`LimiterCancelled`] as soon as `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), LimiterCancelled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LimiterCancelled),
            _ = self.inner.until_ready() => Ok(()),
        }
    }
}

/// Interval between two replenished permits, within
/// `[1ns, MAX_REPLENISH_PERIOD]`.
fn replenish_period(rate: f64) -> Duration {
    Duration::try_from_secs_f64(rate.recip())
        .unwrap_or(MAX_REPLENISH_PERIOD)
        .clamp(Duration::from_nanos(1), MAX_REPLENISH_PERIOD)
}
