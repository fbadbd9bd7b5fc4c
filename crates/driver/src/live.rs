//! Live mode: follow new chain heads and emit one [`BlockMetrics`] per head.
use futures::StreamExt;
use primitives::{
    block_metrics::BlockMetrics,
    errors::FetchError,
    headers::HeaderStream,
    retries::{RetryError, RetryPolicy},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fetcher::{BlockFetcher, send_or_cancel};

/// Capacity of the live output channel.
pub const LIVE_CHANNEL_CAPACITY: usize = 100;

/// Sequential head follower with bounded per-head retries.
#[derive(Debug, Clone)]
pub struct LiveCollector {
    fetcher: BlockFetcher,
    retry: RetryPolicy,
}

impl LiveCollector {
    /// Create a new live collector.
    pub const fn new(fetcher: BlockFetcher, retry: RetryPolicy) -> Self {
        Self { fetcher, retry }
    }

    /// Subscribe to new heads and spawn the collector loop.
    ///
    /// Metrics are delivered in head order on the returned channel, which is
    /// closed when the loop exits.
    pub async fn subscribe(
        self,
        cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<BlockMetrics>, JoinHandle<()>), FetchError> {
        let heads = self.fetcher.source().subscribe_new_heads().await?;
        let (tx, rx) = mpsc::channel(LIVE_CHANNEL_CAPACITY);
        let handle = tokio::spawn(self.run(heads, tx, cancel));
        Ok((rx, handle))
    }

    async fn run(
        self,
        mut heads: HeaderStream,
        tx: mpsc::Sender<BlockMetrics>,
        cancel: CancellationToken,
    ) {
        loop {
            let head = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("live collector cancelled");
                    break;
                }
                next = heads.next() => match next {
                    Some(Ok(head)) => head,
                    Some(Err(err)) => {
                        error!(error = %err, "head subscription failed");
                        break;
                    }
                    None => {
                        warn!("head subscription ended");
                        break;
                    }
                },
            };

            if let Err(err) = self.fetcher.limiter().acquire(&cancel).await {
                debug!(error = %err, "stopping live collector");
                break;
            }

            let number = head.number;
            let fetched = self
                .retry
                .run("fetch block", &cancel, |_| self.fetcher.fetch_raw(number, &cancel))
                .await;

            let raw = match fetched {
                Ok(raw) => raw,
                Err(RetryError::Exhausted { attempts, source }) => {
                    error!(block_number = number, attempts, error = %source, "giving up on block");
                    continue;
                }
                Err(RetryError::Cancelled) => break,
            };

            // Decoding is deterministic, a malformed block is not refetched.
            match self.fetcher.metrics(&raw) {
                Ok(metrics) => {
                    debug!(block_number = number, "collected head");
                    if !send_or_cancel(&tx, metrics, &cancel).await {
                        break;
                    }
                }
                Err(err) => {
                    error!(block_number = number, error = %err, "skipping undecodable block");
                }
            }
        }
        info!("live collector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBlockSource;
    use chrono::FixedOffset;
    use primitives::rate_limiter::RateLimiter;
    use std::{sync::Arc, time::Duration};

    fn collector(source: Arc<MockBlockSource>, attempts: u32) -> LiveCollector {
        let fetcher = BlockFetcher::new(
            source,
            RateLimiter::new(1_000.0, 10),
            FixedOffset::east_opt(0).unwrap(),
        );
        LiveCollector::new(fetcher, RetryPolicy::new(attempts))
    }

    async fn drain(mut rx: mpsc::Receiver<BlockMetrics>) -> Vec<u64> {
        let mut numbers = Vec::new();
        while let Some(metrics) = rx.recv().await {
            numbers.push(metrics.block_number);
        }
        numbers
    }

    #[tokio::test(start_paused = true)]
    async fn emits_heads_in_order_after_retries() {
        let heads = (100..105).map(|n| Ok(MockBlockSource::head(n))).collect();
        let source = Arc::new(
            MockBlockSource::new()
                .with_heads(heads)
                .with_transient_failures(101, 2)
                .with_transient_failures(103, 1),
        );

        let (rx, handle) =
            collector(Arc::clone(&source), 3).subscribe(CancellationToken::new()).await.unwrap();

        assert_eq!(drain(rx).await, vec![100, 101, 102, 103, 104]);
        handle.await.unwrap();
        assert_eq!(source.calls().iter().filter(|n| **n == 101).count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn skips_head_when_retries_are_exhausted() {
        let heads = (1..=3).map(|n| Ok(MockBlockSource::head(n))).collect();
        let source = Arc::new(MockBlockSource::new().with_heads(heads).with_failing([2]));

        let (rx, handle) =
            collector(Arc::clone(&source), 2).subscribe(CancellationToken::new()).await.unwrap();

        assert_eq!(drain(rx).await, vec![1, 3]);
        handle.await.unwrap();
        assert_eq!(source.calls(), vec![1, 2, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_block_is_skipped_without_retry() {
        let heads = (1..=3).map(|n| Ok(MockBlockSource::head(n))).collect();
        let source = Arc::new(MockBlockSource::new().with_heads(heads).with_zero_gas_limit([2]));

        let start = tokio::time::Instant::now();
        let (rx, handle) =
            collector(Arc::clone(&source), 3).subscribe(CancellationToken::new()).await.unwrap();

        assert_eq!(drain(rx).await, vec![1, 3]);
        handle.await.unwrap();
        assert_eq!(source.calls(), vec![1, 2, 3]);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn subscription_error_closes_the_channel() {
        let heads = vec![Ok(MockBlockSource::head(7)), Err(FetchError::SubscriptionClosed)];
        let source = Arc::new(MockBlockSource::new().with_heads(heads).hold_open());

        let (rx, handle) = collector(source, 1).subscribe(CancellationToken::new()).await.unwrap();

        assert_eq!(drain(rx).await, vec![7]);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_an_idle_collector() {
        let source = Arc::new(MockBlockSource::new().hold_open());
        let cancel = CancellationToken::new();
        let (rx, handle) = collector(source, 1).subscribe(cancel.clone()).await.unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(drain(rx).await.is_empty());
    }
}
