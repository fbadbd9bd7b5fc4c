//! Blockminer driver: wires the configured collector to the saver.
use std::{sync::Arc, time::Instant};

use chainio::{AlloyBlockSource, BlockEncoding, BlockSource};
use config::{Mode, Opts, chains};
use derive_more::Debug;
use eyre::{Context, Result};
use primitives::{rate_limiter::RateLimiter, retries::RetryPolicy};
use storage::{BlockWriter, PostgresStore, Store};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    fetcher::BlockFetcher,
    history::{HistoricalCollector, HistoryParams},
    live::LiveCollector,
    saver::{BlockSaver, SaverReport},
};

/// Runs one ingestion session in live or history mode.
#[derive(Debug)]
pub struct Driver {
    opts: Opts,
    #[debug(skip)]
    source: Arc<dyn BlockSource>,
    store: Arc<dyn Store>,
}

impl Driver {
    /// Validate `opts`, connect to the RPC node and to Postgres.
    pub async fn new(opts: Opts) -> Result<Self> {
        info!("Initializing driver");
        opts.validate().wrap_err("invalid configuration")?;

        let endpoint = opts.rpc_endpoint().wrap_err("failed to resolve rpc endpoint")?;
        match chains::lookup(&opts.rpc.chain) {
            Some(chain) => info!(
                chain = chain.name,
                network = chain.network,
                chain_id = chain.chain_id,
                "resolved chain from registry"
            ),
            None => info!(chain = %opts.rpc.chain, "using explicit rpc url"),
        }
        let encoding =
            if opts.collector.json_blocks { BlockEncoding::Json } else { BlockEncoding::Native };

        let source = match opts.collector.mode {
            Mode::Live => AlloyBlockSource::connect_ws(endpoint)
                .await
                .wrap_err("failed to connect to websocket rpc; live mode needs a ws:// or wss:// endpoint")?,
            Mode::History => AlloyBlockSource::connect_http(endpoint),
        }
        .with_encoding(encoding);

        let pg = &opts.postgres;
        let store = PostgresStore::connect(&pg.host, pg.port, &pg.db, &pg.user, &pg.password)
            .await
            .wrap_err_with(|| format!("failed to connect to postgres at {}:{}", pg.host, pg.port))?;

        Ok(Self::from_parts(opts, Arc::new(source), Arc::new(store)))
    }

    /// Assemble a driver from already connected collaborators.
    pub fn from_parts(opts: Opts, source: Arc<dyn BlockSource>, store: Arc<dyn Store>) -> Self {
        Self { opts, source, store }
    }

    /// Run until the collector is exhausted or `cancel` fires, returning the
    /// saver summary.
    pub async fn run(self, cancel: CancellationToken) -> Result<SaverReport> {
        let Self { opts, source, store } = self;
        let collector = &opts.collector;

        let writer = BlockWriter::new(store, &opts.rpc.chain)?;
        if opts.init_schema {
            writer.init_schema().await.wrap_err("failed to create metrics table")?;
        }
        info!(table = writer.table(), "writing block metrics");

        let limiter = RateLimiter::new(collector.rate, collector.burst);
        let fetcher = BlockFetcher::new(source, limiter, collector.timezone_offset);
        let saver = BlockSaver::new(writer).with_copy_threshold(collector.copy_threshold);

        let report = match collector.mode {
            Mode::Live => {
                info!(chain = %opts.rpc.chain, rate = collector.rate, "starting live ingestion");
                let live = LiveCollector::new(fetcher, RetryPolicy::new(collector.max_retries));
                let (blocks, handle) = live
                    .subscribe(cancel.clone())
                    .await
                    .wrap_err("failed to subscribe to new heads")?;
                let report = saver.run_live(blocks, cancel).await;
                handle.await.wrap_err("live collector panicked")?;
                report
            }
            Mode::History => {
                let params = HistoryParams {
                    start: collector.start,
                    end: collector.end,
                    batch_size: collector.batch_size,
                    workers: collector.workers,
                };
                info!(
                    chain = %opts.rpc.chain,
                    start = params.start,
                    end = params.end,
                    workers = params.workers,
                    batch_size = params.batch_size,
                    "starting history ingestion"
                );
                if params.is_empty() {
                    warn!(start = params.start, end = params.end, "empty block range, nothing to backfill");
                }
                let started = Instant::now();
                let history = HistoricalCollector::new(fetcher, params);
                let skipped = history.skipped();
                let (batches, handle) = history.collect(cancel.clone());
                let report = saver
                    .run_history(batches, skipped, cancel)
                    .await
                    .wrap_err("history saver panicked")?;
                handle.await.wrap_err("history collector panicked")?;
                info!(
                    elapsed = ?started.elapsed(),
                    blocks = params.len(),
                    persisted = report.persisted,
                    "history ingestion finished"
                );
                report
            }
        };

        if report.failed_units > 0 {
            warn!(failed = report.failed_units, "some blocks could not be saved");
        }
        info!(persisted = report.persisted, "driver finished");
        Ok(report)
    }
}
