//! Rate limited block fetching shared by both collectors.
use std::sync::Arc;

use chainio::BlockSource;
use chrono::FixedOffset;
use derive_more::Debug;
use primitives::{
    block_metrics::BlockMetrics,
    errors::{DecodeError, FetchError},
    headers::RawBlock,
    rate_limiter::RateLimiter,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fetches blocks through a shared [`RateLimiter`] and turns them into
/// [`BlockMetrics`] localized to a fixed offset.
#[derive(Clone, Debug)]
pub struct BlockFetcher {
    #[debug(skip)]
    source: Arc<dyn BlockSource>,
    limiter: RateLimiter,
    offset: FixedOffset,
}

impl BlockFetcher {
    /// Create a new fetcher. Clones share `limiter`.
    pub fn new(source: Arc<dyn BlockSource>, limiter: RateLimiter, offset: FixedOffset) -> Self {
        Self { source, limiter, offset }
    }

    /// The underlying block source.
    pub const fn source(&self) -> &Arc<dyn BlockSource> {
        &self.source
    }

    /// The shared limiter.
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Take a limiter token, then fetch and build metrics for `number`.
    pub async fn fetch(
        &self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<BlockMetrics, FetchError> {
        self.limiter.acquire(cancel).await?;
        let raw = self.fetch_raw(number, cancel).await?;
        Ok(self.metrics(&raw)?)
    }

    /// Fetch block `number` from the source without touching the limiter.
    pub async fn fetch_raw(
        &self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<RawBlock, FetchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            raw = self.source.fetch_block_by_number(number) => raw,
        }
    }

    /// Build metrics for an already fetched block in the configured offset.
    pub fn metrics(&self, raw: &RawBlock) -> Result<BlockMetrics, DecodeError> {
        BlockMetrics::from_raw(raw, self.offset)
    }
}

/// Send `value` unless `cancel` fires first. Returns `false` when the value
/// was not delivered, either because of cancellation or a dropped receiver.
pub(crate) async fn send_or_cancel<T>(
    tx: &mpsc::Sender<T>,
    value: T,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(value) => sent.is_ok(),
    }
}
