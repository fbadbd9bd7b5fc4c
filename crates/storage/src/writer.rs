use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, FixedOffset};
use derive_more::Debug;
use primitives::block_metrics::BlockMetrics;
use tracing::{debug, info};

use crate::{
    SqlValue, Store, StoreError,
    partition::PartitionKey,
    schema::{self, BLOCK_METRICS_COLUMNS},
};

/// Writes [`BlockMetrics`] rows into the metrics table of one chain.
#[derive(Clone, Debug)]
pub struct BlockWriter {
    #[debug(skip)]
    store: Arc<dyn Store>,
    table: String,
    insert_sql: String,
}

impl BlockWriter {
    /// Create a writer for the `<chain>_block_metrics` table.
    pub fn new(store: Arc<dyn Store>, chain: &str) -> Result<Self, StoreError> {
        let table = schema::table_name(chain);
        if !schema::is_valid_identifier(&table) {
            return Err(StoreError::InvalidIdentifier(table));
        }
        let insert_sql = schema::insert_sql(&table);
        Ok(Self { store, table, insert_sql })
    }

    /// Name of the parent table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the partitioned parent table if it does not exist.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        self.store.execute(&schema::create_table_sql(&self.table), &[]).await?;
        info!(table = %self.table, "metrics table ready");
        Ok(())
    }

    /// Create the day partition holding `time` if it does not exist.
    pub async fn ensure_partition(&self, time: &DateTime<FixedOffset>) -> Result<(), StoreError> {
        let key = PartitionKey::of(time);
        self.store.execute(&key.create_sql(&self.table)?, &[]).await?;
        debug!(partition = %key.table_name(&self.table), "partition ensured");
        Ok(())
    }

    /// Create every distinct day partition touched by `blocks`, returning how
    /// many distinct days were seen.
    pub async fn ensure_partitions(&self, blocks: &[BlockMetrics]) -> Result<usize, StoreError> {
        let mut seen = HashSet::new();
        for block in blocks {
            if seen.insert(PartitionKey::of(&block.block_time)) {
                self.ensure_partition(&block.block_time).await?;
            }
        }
        Ok(seen.len())
    }

    /// Insert a single row. The partition must already exist.
    pub async fn insert_block(&self, block: &BlockMetrics) -> Result<(), StoreError> {
        self.store.execute(&self.insert_sql, &block_row(block)?).await?;
        Ok(())
    }

    /// Insert `blocks` with one parameterized statement per row in a single
    /// transaction.
    pub async fn insert_blocks_batch(&self, blocks: &[BlockMetrics]) -> Result<u64, StoreError> {
        let rows = blocks.iter().map(block_row).collect::<Result<Vec<_>, _>>()?;
        self.store.batch_execute(&self.insert_sql, rows).await
    }

    /// Insert `blocks` with a binary `COPY`.
    pub async fn insert_blocks_copy(&self, blocks: &[BlockMetrics]) -> Result<u64, StoreError> {
        let rows = blocks.iter().map(block_row).collect::<Result<Vec<_>, _>>()?;
        self.store.bulk_copy(&self.table, BLOCK_METRICS_COLUMNS, rows).await
    }
}

/// Map a block to bind parameters in [`BLOCK_METRICS_COLUMNS`] order.
pub fn block_row(block: &BlockMetrics) -> Result<Vec<SqlValue>, StoreError> {
    let stats = &block.gas_stats;
    Ok(vec![
        SqlValue::BigInt(to_bigint("block_number", block.block_number)?),
        SqlValue::TimestampTz(block.block_time),
        SqlValue::Int(i32::try_from(block.transactions_count).map_err(|_| {
            StoreError::OutOfRange {
                column: "transactions_count",
                value: block.transactions_count.to_string(),
            }
        })?),
        SqlValue::BigInt(to_bigint("block_size_bytes", block.block_size_bytes)?),
        SqlValue::BigInt(to_bigint("gas_limit", block.gas_limit)?),
        SqlValue::BigInt(to_bigint("gas_used", block.gas_used)?),
        SqlValue::Double(block.block_fullness),
        SqlValue::Text(block.validator.clone()),
        SqlValue::Double(stats.min),
        SqlValue::Double(stats.max),
        SqlValue::Double(stats.avg),
        SqlValue::Double(stats.stddev),
        SqlValue::DoubleArray(stats.all_prices.clone()),
        SqlValue::BigInt(to_bigint("block_timestamp", block.block_timestamp)?),
    ])
}

fn to_bigint(column: &'static str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange { column, value: value.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, Recorded};
    use chrono::TimeZone;
    use primitives::gas_stats::GasStats;

    fn block(number: u64, time: DateTime<FixedOffset>) -> BlockMetrics {
        BlockMetrics {
            block_number: number,
            block_time: time,
            block_timestamp: time.timestamp() as u64,
            transactions_count: 2,
            block_size_bytes: 1024,
            gas_limit: 30_000_000,
            gas_used: 15_000_000,
            block_fullness: 50.0,
            validator: "0x95222290DD7278Aa3Ddd389Cc1E1d165CC4BAfe5".to_owned(),
            gas_stats: GasStats::from_prices_wei(&[1_000_000_000, 3_000_000_000]),
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn rejects_unsafe_chain_names() {
        let store = Arc::new(MemoryStore::default());
        assert!(matches!(
            BlockWriter::new(store, "eth; drop table x"),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn row_matches_column_order() {
        let time = utc().with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let row = block_row(&block(7, time)).unwrap();
        assert_eq!(row.len(), BLOCK_METRICS_COLUMNS.len());
        assert_eq!(row[0], SqlValue::BigInt(7));
        assert_eq!(row[1], SqlValue::TimestampTz(time));
        assert_eq!(row[2], SqlValue::Int(2));
        assert_eq!(row[12], SqlValue::DoubleArray(vec![1.0, 3.0]));
        assert_eq!(row[13], SqlValue::BigInt(time.timestamp()));
    }

    #[test]
    fn out_of_range_number_is_rejected() {
        let time = utc().with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let err = block_row(&block(u64::MAX, time)).unwrap_err();
        assert!(matches!(err, StoreError::OutOfRange { column: "block_number", .. }));
    }

    #[tokio::test]
    async fn ensure_partitions_dedups_by_day() {
        let store = Arc::new(MemoryStore::default());
        let writer = BlockWriter::new(Arc::clone(&store) as _, "ethereum").unwrap();
        let day1 = utc().with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let day1_late = utc().with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap();
        let day2 = utc().with_ymd_and_hms(2024, 1, 2, 0, 30, 0).unwrap();
        let blocks = vec![block(1, day1), block(2, day2), block(3, day1_late)];

        assert_eq!(writer.ensure_partitions(&blocks).await.unwrap(), 2);
        let partitions = store.partitions_created();
        assert_eq!(
            partitions,
            vec![
                "ethereum_block_metrics_2024_01_01".to_owned(),
                "ethereum_block_metrics_2024_01_02".to_owned()
            ]
        );
    }

    #[tokio::test]
    async fn ensure_partition_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let writer = BlockWriter::new(Arc::clone(&store) as _, "ethereum").unwrap();
        let time = utc().with_ymd_and_hms(2024, 3, 3, 3, 0, 0).unwrap();
        writer.ensure_partition(&time).await.unwrap();
        writer.ensure_partition(&time).await.unwrap();

        let records = store.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], records[1]);
        match &records[0] {
            Recorded::Execute { sql, .. } => assert!(sql.contains("IF NOT EXISTS")),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_and_copy_use_distinct_store_calls() {
        let store = Arc::new(MemoryStore::default());
        let writer = BlockWriter::new(Arc::clone(&store) as _, "polygon").unwrap();
        let time = utc().with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let blocks = vec![block(1, time), block(2, time)];

        assert_eq!(writer.insert_blocks_batch(&blocks).await.unwrap(), 2);
        assert_eq!(writer.insert_blocks_copy(&blocks).await.unwrap(), 2);

        let records = store.records();
        assert!(matches!(&records[0], Recorded::Batch { rows, .. } if rows.len() == 2));
        assert!(
            matches!(&records[1], Recorded::Copy { table, rows, .. } if table == "polygon_block_metrics" && rows.len() == 2)
        );
    }
}
