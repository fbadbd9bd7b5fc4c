//! Persistence of collected metrics into the day-partitioned metrics table.
use config::DEFAULT_COPY_THRESHOLD;
use primitives::block_metrics::BlockMetrics;
use storage::{BlockWriter, StoreError};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::history::SkippedBlocks;

/// How a batch is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStrategy {
    /// One parameterized insert per row, pipelined in a single transaction.
    MultiRow,
    /// Binary `COPY ... FROM STDIN`.
    BulkCopy,
}

/// Summary of a saver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaverReport {
    /// Rows written
    pub persisted: u64,
    /// Blocks (live) or batches (history) dropped after a store error
    pub failed_units: u64,
    /// Blocks the collector gave up on before they reached the saver
    pub skipped_blocks: u64,
}

/// Consumes collector output and writes it through a [`BlockWriter`].
#[derive(Debug, Clone)]
pub struct BlockSaver {
    writer: BlockWriter,
    copy_threshold: usize,
}

impl BlockSaver {
    /// Create a saver using the default copy threshold.
    pub const fn new(writer: BlockWriter) -> Self {
        Self { writer, copy_threshold: DEFAULT_COPY_THRESHOLD }
    }

    /// Batches of at least `threshold` blocks are written with `COPY`.
    pub const fn with_copy_threshold(mut self, threshold: usize) -> Self {
        self.copy_threshold = threshold;
        self
    }

    /// Strategy used for a batch of `len` blocks.
    pub const fn strategy_for(&self, len: usize) -> InsertStrategy {
        if len < self.copy_threshold { InsertStrategy::MultiRow } else { InsertStrategy::BulkCopy }
    }

    /// Ensure the day partition of `block`, then insert it.
    pub async fn save_block(&self, block: &BlockMetrics) -> Result<(), StoreError> {
        self.writer.ensure_partition(&block.block_time).await?;
        self.writer.insert_block(block).await
    }

    /// Ensure every day partition touched by `blocks`, then write them with
    /// the strategy chosen for their count.
    pub async fn save_batch(&self, blocks: &[BlockMetrics]) -> Result<u64, StoreError> {
        let days = self.writer.ensure_partitions(blocks).await?;
        let strategy = self.strategy_for(blocks.len());
        debug!(blocks = blocks.len(), days, ?strategy, "writing batch");
        match strategy {
            InsertStrategy::MultiRow => self.writer.insert_blocks_batch(blocks).await,
            InsertStrategy::BulkCopy => self.writer.insert_blocks_copy(blocks).await,
        }
    }

    /// Persist live metrics one by one until the channel closes or `cancel`
    /// fires. Failed blocks are logged and dropped.
    pub async fn run_live(
        self,
        mut blocks: mpsc::Receiver<BlockMetrics>,
        cancel: CancellationToken,
    ) -> SaverReport {
        let mut report = SaverReport::default();
        loop {
            let block = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("live saver cancelled");
                    break;
                }
                block = blocks.recv() => match block {
                    Some(block) => block,
                    None => {
                        info!("live collector closed, saver exiting");
                        break;
                    }
                },
            };

            match self.save_block(&block).await {
                Ok(()) => {
                    report.persisted += 1;
                    info!(
                        block_number = block.block_number,
                        txs = block.transactions_count,
                        fullness = block.block_fullness,
                        "saved block"
                    );
                }
                Err(err) => {
                    report.failed_units += 1;
                    log_store_error(&err, block.block_number, 1);
                }
            }
        }
        report
    }

    /// Persist history batches on a background task. The handle resolves
    /// once the batch channel is drained or `cancel` fires.
    pub fn run_history(
        self,
        mut batches: mpsc::Receiver<Vec<BlockMetrics>>,
        skipped: SkippedBlocks,
        cancel: CancellationToken,
    ) -> JoinHandle<SaverReport> {
        tokio::spawn(async move {
            let mut report = SaverReport::default();
            loop {
                let batch = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("history saver cancelled");
                        break;
                    }
                    batch = batches.recv() => match batch {
                        Some(batch) => batch,
                        None => break,
                    },
                };

                let Some(first) = batch.first() else {
                    warn!("received empty batch, skipping");
                    continue;
                };
                let first_block = first.block_number;

                match self.save_batch(&batch).await {
                    Ok(rows) => {
                        report.persisted += rows;
                        info!(first_block, blocks = batch.len(), "saved batch");
                    }
                    Err(err) => {
                        report.failed_units += 1;
                        log_store_error(&err, first_block, batch.len());
                    }
                }
            }

            report.skipped_blocks = skipped.count();
            if report.skipped_blocks > 0 {
                warn!(skipped = report.skipped_blocks, "some blocks were never fetched");
            }
            report
        })
    }
}

fn log_store_error(err: &StoreError, block_number: u64, blocks: usize) {
    match err {
        StoreError::Database { message, detail, location, code } => error!(
            block_number,
            blocks,
            code = %code,
            detail = detail.as_deref().unwrap_or_default(),
            location = location.as_deref().unwrap_or_default(),
            "postgres error: {message}"
        ),
        other => error!(block_number, blocks, err = %other, "failed to save blocks"),
    }
}
