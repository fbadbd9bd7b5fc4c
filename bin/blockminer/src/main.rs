//! Entrypoint.

use clap::Parser;
use config::Opts;
use dotenvy::dotenv;
use driver::Driver;
use eyre::Context;
use runtime::shutdown::{ShutdownSignal, cancel_on_shutdown};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    if let Ok(custom_env_file) = std::env::var("ENV_FILE") {
        dotenvy::from_filename(custom_env_file)?;
    } else {
        // Try the default .env file, and ignore if it doesn't exist.
        dotenv().ok();
    }

    let opts = Opts::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(mode = ?opts.collector.mode, chain = %opts.rpc.chain, "blockminer starting");

    let cancel = CancellationToken::new();
    let shutdown = ShutdownSignal::new().wrap_err("failed to install signal handlers")?;
    let bridge = cancel_on_shutdown(shutdown, cancel.clone());

    let report = Driver::new(opts).await?.run(cancel.clone()).await;
    cancel.cancel();
    let _ = bridge.await;

    let report = report?;
    info!(
        persisted = report.persisted,
        failed = report.failed_units,
        skipped = report.skipped_blocks,
        "blockminer stopped"
    );
    Ok(())
}
