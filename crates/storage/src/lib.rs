//! Postgres persistence for block metrics.
//!
//! The [`Store`] trait is the narrow driver surface the pipeline needs;
//! [`BlockWriter`] turns [`primitives::block_metrics::BlockMetrics`] into
//! rows, statements and day partitions on top of it.
mod error;
pub use error::StoreError;

pub mod partition;
pub mod schema;

mod postgres;
pub use postgres::PostgresStore;

mod store;
pub use store::{ColumnDef, SqlValue, Store};

mod writer;
pub use writer::BlockWriter;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
