//! Blockminer configuration
use chrono::{FixedOffset, Offset, Utc};
use clap::{Parser, ValueEnum};
use thiserror::Error;
use url::Url;

pub mod chains;

use chains::Transport;

/// Default number of rows from which a batch is written with `COPY`.
pub const DEFAULT_COPY_THRESHOLD: usize = 999;

/// Postgres database configuration options
#[derive(Debug, Clone, Parser)]
pub struct PostgresOpts {
    /// Postgres host
    #[clap(long = "postgres-host", env = "POSTGRES_HOST", default_value = "localhost")]
    pub host: String,
    /// Postgres port
    #[clap(long = "postgres-port", env = "POSTGRES_PORT", default_value = "5432")]
    pub port: u16,
    /// Postgres database
    #[clap(long = "postgres-db", env = "POSTGRES_DB")]
    pub db: String,
    /// Postgres username
    #[clap(long = "postgres-user", env = "POSTGRES_USER")]
    pub user: String,
    /// Postgres password
    #[clap(long = "postgres-password", env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pub password: String,
}

/// RPC endpoint configuration options
#[derive(Debug, Clone, Parser)]
pub struct RpcOpts {
    /// Chain to ingest, one of the registry names (ethereum, polygon, bnb, ...)
    #[clap(long, env = "CHAIN", default_value = "ethereum")]
    pub chain: String,
    /// Name of the environment variable holding the RPC provider API key
    #[clap(long, env = "API_KEY_ENV", default_value = "ALCHEMY_API_KEY")]
    pub api_key_env: String,
    /// Explicit RPC URL, bypassing the chain registry
    #[clap(long, env = "RPC_URL")]
    pub rpc_url: Option<Url>,
}

/// Ingestion mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Follow new chain heads
    #[value(alias = "last")]
    Live,
    /// Backfill a closed block range
    History,
}

impl Mode {
    /// Transport needed by this mode.
    pub const fn transport(self) -> Transport {
        match self {
            Self::Live => Transport::Ws,
            Self::History => Transport::Http,
        }
    }
}

/// Collector and saver configuration options
#[derive(Debug, Clone, Parser)]
pub struct CollectorOpts {
    /// Ingestion mode
    #[clap(long, env = "MINER_MODE", value_enum, default_value = "live")]
    pub mode: Mode,
    /// Sustained block fetch rate (requests per second)
    #[clap(long, env = "LIMITER_RATE", default_value = "10")]
    pub rate: f64,
    /// Rate limiter burst capacity
    #[clap(long, env = "LIMITER_BURST", default_value = "10")]
    pub burst: u32,
    /// Fetch attempts per head in live mode
    #[clap(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,
    /// Blocks per batch in history mode
    #[clap(long, env = "BATCH_SIZE", default_value = "100")]
    pub batch_size: usize,
    /// First block of the history range (inclusive)
    #[clap(long, env = "START_BLOCK", default_value = "0")]
    pub start: u64,
    /// Last block of the history range (inclusive)
    #[clap(long, env = "END_BLOCK", default_value = "0")]
    pub end: u64,
    /// Concurrent fetch workers in history mode
    #[clap(long, env = "WORKERS", default_value = "4")]
    pub workers: usize,
    /// UTC offset used for block times and day partitions, e.g. `+03:00`
    #[clap(long, env = "TIMEZONE_OFFSET", default_value = "+00:00", value_parser = parse_offset)]
    pub timezone_offset: FixedOffset,
    /// Batch size from which rows are written with `COPY` instead of inserts
    #[clap(long, env = "COPY_THRESHOLD", default_value_t = DEFAULT_COPY_THRESHOLD)]
    pub copy_threshold: usize,
    /// Fetch blocks in their raw JSON-RPC form and decode the hex fields locally
    #[clap(long, env = "JSON_BLOCKS")]
    pub json_blocks: bool,
}

/// CLI options for blockminer
#[derive(Debug, Clone, Parser)]
#[clap(name = "blockminer", about = "Ingest per-block gas metrics into Postgres")]
pub struct Opts {
    /// Postgres database configuration
    #[clap(flatten)]
    pub postgres: PostgresOpts,

    /// RPC endpoint configuration
    #[clap(flatten)]
    pub rpc: RpcOpts,

    /// Collector configuration
    #[clap(flatten)]
    pub collector: CollectorOpts,

    /// If set, create the partitioned metrics table when it does not exist
    #[clap(long)]
    pub init_schema: bool,
}

/// Invalid or incomplete configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A numeric option is out of its allowed range.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue {
        /// Option name
        name: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
    /// The chain is not in the registry and no explicit RPC URL was given.
    #[error("unknown chain {0:?}; pass --rpc-url or use one of the registry chains")]
    UnknownChain(String),
    /// The chain name cannot be used as a table prefix.
    #[error("chain name {0:?} must be lowercase ascii letters, digits or underscores")]
    InvalidChainName(String),
    /// The API key environment variable is not set.
    #[error("environment variable {0} holding the API key is not set")]
    MissingApiKey(String),
    /// The resolved endpoint is not a valid URL.
    #[error("invalid rpc url: {0}")]
    Url(#[from] url::ParseError),
}

impl Opts {
    /// Check option ranges that clap cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.collector;
        if c.workers == 0 {
            return Err(ConfigError::InvalidValue { name: "workers", reason: "must be positive" });
        }
        if c.batch_size == 0 {
            return Err(ConfigError::InvalidValue { name: "batch-size", reason: "must be positive" });
        }
        if !(c.rate.is_finite() && c.rate > 0.0) {
            return Err(ConfigError::InvalidValue { name: "rate", reason: "must be positive" });
        }
        if c.max_retries == 0 {
            return Err(ConfigError::InvalidValue { name: "max-retries", reason: "must be at least 1" });
        }
        if c.copy_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                name: "copy-threshold",
                reason: "must be positive",
            });
        }
        let chain = &self.rpc.chain;
        if chain.is_empty() ||
            !chain.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
        {
            return Err(ConfigError::InvalidChainName(chain.clone()));
        }
        if self.rpc.rpc_url.is_none() && chains::lookup(chain).is_none() {
            return Err(ConfigError::UnknownChain(chain.clone()));
        }
        Ok(())
    }

    /// Resolve the RPC endpoint for the configured mode, reading the API key
    /// from the environment when the registry is used.
    pub fn rpc_endpoint(&self) -> Result<Url, ConfigError> {
        if let Some(url) = &self.rpc.rpc_url {
            return Ok(url.clone());
        }
        let api_key = std::env::var(&self.rpc.api_key_env)
            .map_err(|_| ConfigError::MissingApiKey(self.rpc.api_key_env.clone()))?;
        self.registry_endpoint(&api_key)
    }

    /// Build the registry endpoint of the configured chain with `api_key`.
    pub fn registry_endpoint(&self, api_key: &str) -> Result<Url, ConfigError> {
        let chain = chains::lookup(&self.rpc.chain)
            .ok_or_else(|| ConfigError::UnknownChain(self.rpc.chain.clone()))?;
        Ok(chain.endpoint(self.collector.mode.transport(), api_key)?)
    }
}

/// Parse a UTC offset such as `+03:00`, `-0530` or `UTC`.
pub fn parse_offset(value: &str) -> Result<FixedOffset, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("utc") || value == "Z" {
        return Ok(Utc.fix());
    }
    value.parse::<FixedOffset>().map_err(|err| format!("invalid utc offset {value:?}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: &[&str] =
        &["blockminer", "--postgres-db", "metrics", "--postgres-user", "u", "--postgres-password", "p"];

    fn parse(extra: &[&str]) -> Opts {
        Opts::try_parse_from(REQUIRED.iter().chain(extra)).unwrap()
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Opts::command().debug_assert()
    }

    #[test]
    fn last_is_an_alias_for_live() {
        let opts = parse(&["--mode", "last"]);
        assert_eq!(opts.collector.mode, Mode::Live);
        assert_eq!(opts.collector.mode.transport(), Transport::Ws);
    }

    #[test]
    fn defaults_match_collector_constants() {
        let opts = parse(&[]);
        assert_eq!(opts.collector.burst, 10);
        assert_eq!(opts.collector.copy_threshold, DEFAULT_COPY_THRESHOLD);
        assert_eq!(opts.collector.timezone_offset.local_minus_utc(), 0);
        assert!(!opts.collector.json_blocks);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn parses_timezone_offsets() {
        assert_eq!(parse_offset("+03:00").unwrap().local_minus_utc(), 3 * 3600);
        assert_eq!(parse_offset("-0530").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(parse_offset("UTC").unwrap().local_minus_utc(), 0);
        assert!(parse_offset("Europe/Moscow").is_err());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let opts = parse(&["--workers", "0"]);
        assert_eq!(
            opts.validate(),
            Err(ConfigError::InvalidValue { name: "workers", reason: "must be positive" })
        );
    }

    #[test]
    fn inverted_history_range_is_a_valid_empty_backfill() {
        let opts = parse(&["--mode", "history", "--start", "10", "--end", "5"]);
        assert_eq!(opts.validate(), Ok(()));
    }

    #[test]
    fn unknown_chain_requires_explicit_url() {
        let opts = parse(&["--chain", "devnet"]);
        assert_eq!(opts.validate(), Err(ConfigError::UnknownChain("devnet".to_owned())));

        let opts = parse(&["--chain", "devnet", "--rpc-url", "ws://127.0.0.1:8546"]);
        assert!(opts.validate().is_ok());
        assert_eq!(opts.rpc_endpoint().unwrap().as_str(), "ws://127.0.0.1:8546/");
    }

    #[test]
    fn chain_name_must_be_a_table_prefix() {
        let opts = parse(&["--chain", "eth-main; drop", "--rpc-url", "ws://127.0.0.1:8546"]);
        assert!(matches!(opts.validate(), Err(ConfigError::InvalidChainName(_))));
    }

    #[test]
    fn registry_endpoint_uses_mode_transport() {
        let opts = parse(&["--mode", "history", "--chain", "base", "--end", "1"]);
        assert_eq!(
            opts.registry_endpoint("abc").unwrap().as_str(),
            "https://base-mainnet.g.alchemy.com/v2/abc"
        );
    }
}
