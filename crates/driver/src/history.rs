//! History mode: backfill a closed block range with a pool of workers and
//! group the results into batches.
//!
//! ```text
//! range generator -> work queue -> N workers -> results -> batcher -> batches
//! ```
//!
//! Batches carry blocks in completion order; nothing is sorted.
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use primitives::{block_metrics::BlockMetrics, errors::FetchError};
use tokio::{
    sync::{Mutex, mpsc},
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fetcher::{BlockFetcher, send_or_cancel};

/// Capacity of the batch output channel.
pub const HISTORY_OUTPUT_CAPACITY: usize = 10;

/// Range and sizing of a backfill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryParams {
    /// First block (inclusive)
    pub start: u64,
    /// Last block (inclusive)
    pub end: u64,
    /// Blocks per emitted batch
    pub batch_size: usize,
    /// Concurrent fetch workers
    pub workers: usize,
}

impl HistoryParams {
    /// Number of blocks in the range.
    pub const fn len(&self) -> u64 {
        if self.start > self.end { 0 } else { (self.end - self.start).saturating_add(1) }
    }

    /// Returns `true` if the range holds no block.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    const fn queue_capacity(&self) -> usize {
        let capacity = self.batch_size.saturating_mul(self.workers);
        if capacity == 0 { 1 } else { capacity }
    }
}

/// Count of blocks that were given up on during a backfill.
#[derive(Debug, Clone, Default)]
pub struct SkippedBlocks(Arc<AtomicU64>);

impl SkippedBlocks {
    fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of skipped blocks so far.
    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Backfills a block range with a worker pool.
#[derive(Debug)]
pub struct HistoricalCollector {
    fetcher: BlockFetcher,
    params: HistoryParams,
    skipped: SkippedBlocks,
}

impl HistoricalCollector {
    /// Create a new collector for `params`.
    pub fn new(fetcher: BlockFetcher, params: HistoryParams) -> Self {
        Self { fetcher, params, skipped: SkippedBlocks::default() }
    }

    /// Handle on the skipped-block counter of this run.
    pub fn skipped(&self) -> SkippedBlocks {
        self.skipped.clone()
    }

    /// Start the pipeline. Batches arrive on the returned channel, which is
    /// closed once every block has been processed or `cancel` fires. The
    /// handle completes when every stage has exited.
    pub fn collect(
        self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<Vec<BlockMetrics>>, JoinHandle<()>) {
        let Self { fetcher, params, skipped } = self;
        let capacity = params.queue_capacity();

        let (work_tx, work_rx) = mpsc::channel(capacity);
        let generator = tokio::spawn(generate_range(params.start, params.end, work_tx, cancel.clone()));

        let (results_tx, results_rx) = mpsc::channel(capacity);
        let queue = Arc::new(Mutex::new(work_rx));
        let mut workers = JoinSet::new();
        for id in 0..params.workers.max(1) {
            workers.spawn(run_worker(
                id,
                fetcher.clone(),
                Arc::clone(&queue),
                results_tx.clone(),
                skipped.clone(),
                cancel.clone(),
            ));
        }
        drop(queue);

        // The results channel closes when the last sender is dropped: every
        // worker holds a clone and the supervisor drops the original only
        // after the whole pool has exited.
        let supervisor = tokio::spawn(async move {
            while let Some(joined) = workers.join_next().await {
                if let Err(err) = joined {
                    error!(error = %err, "history worker panicked");
                }
            }
            drop(results_tx);
            debug!("all history workers finished");
        });

        let (out_tx, out_rx) = mpsc::channel(HISTORY_OUTPUT_CAPACITY);
        let batcher = tokio::spawn(run_batcher(results_rx, out_tx, params.batch_size.max(1), cancel));

        let handle = tokio::spawn(async move {
            let (generator, supervisor, batcher) = tokio::join!(generator, supervisor, batcher);
            for (stage, joined) in [("generator", generator), ("supervisor", supervisor), ("batcher", batcher)] {
                if let Err(err) = joined {
                    error!(stage, error = %err, "history stage panicked");
                }
            }
        });

        (out_rx, handle)
    }
}

/// Feed every number of `[start, end]` into the work queue.
async fn generate_range(
    start: u64,
    end: u64,
    tx: mpsc::Sender<u64>,
    cancel: CancellationToken,
) {
    if start > end {
        warn!(start, end, "empty block range");
        return;
    }
    for number in start..=end {
        if !send_or_cancel(&tx, number, &cancel).await {
            debug!(block_number = number, "range generator stopped");
            return;
        }
    }
    debug!(start, end, "range fully queued");
}

async fn run_worker(
    id: usize,
    fetcher: BlockFetcher,
    queue: Arc<Mutex<mpsc::Receiver<u64>>>,
    results: mpsc::Sender<BlockMetrics>,
    skipped: SkippedBlocks,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = async { queue.lock().await.recv().await } => next,
        };
        let Some(number) = next else { break };

        match fetcher.fetch(number, &cancel).await {
            Ok(metrics) => {
                if !send_or_cancel(&results, metrics, &cancel).await {
                    break;
                }
            }
            Err(FetchError::Cancelled) => break,
            Err(err) => {
                skipped.record();
                warn!(worker = id, block_number = number, error = %err, "skipping block");
            }
        }
    }
    debug!(worker = id, "history worker exited");
}

async fn run_batcher(
    mut results: mpsc::Receiver<BlockMetrics>,
    out: mpsc::Sender<Vec<BlockMetrics>>,
    batch_size: usize,
    cancel: CancellationToken,
) {
    let mut batch = Vec::with_capacity(batch_size);
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(discarded = batch.len(), "batcher cancelled");
                return;
            }
            next = results.recv() => next,
        };

        match next {
            Some(metrics) => {
                batch.push(metrics);
                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if !send_or_cancel(&out, full, &cancel).await {
                        return;
                    }
                }
            }
            None => {
                let remaining = batch.len();
                if remaining > 0 && send_or_cancel(&out, batch, &cancel).await {
                    info!(blocks = remaining, "sent final batch");
                }
                info!("all blocks collected and batched");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBlockSource;
    use chrono::FixedOffset;
    use primitives::rate_limiter::RateLimiter;
    use std::{collections::BTreeSet, time::Duration};

    fn collector(source: MockBlockSource, params: HistoryParams) -> HistoricalCollector {
        let fetcher = BlockFetcher::new(
            Arc::new(source),
            RateLimiter::new(100_000.0, 1_000),
            FixedOffset::east_opt(0).unwrap(),
        );
        HistoricalCollector::new(fetcher, params)
    }

    fn params(start: u64, end: u64, batch_size: usize, workers: usize) -> HistoryParams {
        HistoryParams { start, end, batch_size, workers }
    }

    async fn drain(mut rx: mpsc::Receiver<Vec<BlockMetrics>>) -> Vec<Vec<u64>> {
        let mut batches = Vec::new();
        while let Some(batch) = rx.recv().await {
            batches.push(batch.iter().map(|m| m.block_number).collect());
        }
        batches
    }

    #[tokio::test]
    async fn covers_range_exactly_once() {
        let (rx, handle) =
            collector(MockBlockSource::new(), params(1_000, 1_024, 4, 3)).collect(CancellationToken::new());

        let batches = drain(rx).await;
        handle.await.unwrap();

        let all: Vec<u64> = batches.iter().flatten().copied().collect();
        let distinct: BTreeSet<u64> = all.iter().copied().collect();
        assert_eq!(all.len(), 25);
        assert_eq!(distinct, (1_000..=1_024).collect());

        let (last, full) = batches.split_last().unwrap();
        assert!(full.iter().all(|batch| batch.len() == 4));
        assert_eq!(last.len(), 1);
    }

    #[tokio::test]
    async fn failing_block_is_skipped_and_counted() {
        let source = MockBlockSource::new().with_failing([5]).with_zero_gas_limit([8]);
        let collector = collector(source, params(1, 10, 3, 2));
        let skipped = collector.skipped();
        let (rx, handle) = collector.collect(CancellationToken::new());

        let batches = drain(rx).await;
        handle.await.unwrap();

        let (last, full) = batches.split_last().unwrap();
        assert!(full.iter().all(|batch| batch.len() == 3), "{batches:?}");
        assert!(!last.is_empty() && last.len() <= 3);
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total as u64, params(1, 10, 3, 2).len() - skipped.count());

        let all: BTreeSet<u64> = batches.into_iter().flatten().collect();
        assert_eq!(all, [1, 2, 3, 4, 6, 7, 9, 10].into_iter().collect());
        assert_eq!(skipped.count(), 2);
    }

    #[tokio::test]
    async fn inverted_range_yields_nothing() {
        let (rx, handle) =
            collector(MockBlockSource::new(), params(10, 5, 3, 2)).collect(CancellationToken::new());
        assert!(drain(rx).await.is_empty());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_terminates_the_pipeline() {
        let source = MockBlockSource::new().with_delay(Duration::from_millis(50));
        let cancel = CancellationToken::new();
        let (rx, handle) = collector(source, params(0, 1_000_000, 100, 4)).collect(cancel.clone());

        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();

        let batches = tokio::time::timeout(Duration::from_secs(2), drain(rx)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        // the partial batch is discarded, nothing reached batch_size
        assert!(batches.is_empty());
    }

    #[test]
    fn params_len_handles_inverted_range() {
        assert_eq!(params(5, 5, 1, 1).len(), 1);
        assert!(params(6, 5, 1, 1).is_empty());
    }

    #[test]
    fn params_len_saturates_on_full_range() {
        assert_eq!(params(0, u64::MAX, 1, 1).len(), u64::MAX);
        assert!(!params(0, u64::MAX, 1, 1).is_empty());
    }
}
