//! Day partitions of the metrics table.
use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::StoreError;

/// A calendar day in a fixed reference offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    day: NaiveDate,
    offset: FixedOffset,
}

impl PartitionKey {
    /// Partition holding `time`, using the offset `time` is expressed in.
    pub fn of(time: &DateTime<FixedOffset>) -> Self {
        Self { day: time.date_naive(), offset: *time.offset() }
    }

    /// Calendar day of the partition.
    pub const fn day(&self) -> NaiveDate {
        self.day
    }

    /// Child table name, `<parent>_YYYY_MM_DD`.
    pub fn table_name(&self, parent: &str) -> String {
        format!("{parent}_{}", self.day.format("%Y_%m_%d"))
    }

    /// Half-open bounds `[day 00:00, next day 00:00)` in the reference offset.
    pub fn bounds(&self) -> Result<(DateTime<FixedOffset>, DateTime<FixedOffset>), StoreError> {
        let next = self.day.succ_opt().ok_or_else(|| self.out_of_range())?;
        Ok((self.midnight(self.day)?, self.midnight(next)?))
    }

    /// Idempotent statement creating the partition under `parent`.
    pub fn create_sql(&self, parent: &str) -> Result<String, StoreError> {
        let (start, end) = self.bounds()?;
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} PARTITION OF {parent} \
             FOR VALUES FROM (TIMESTAMPTZ '{}') TO (TIMESTAMPTZ '{}')",
            self.table_name(parent),
            start.format(TIMESTAMPTZ_FORMAT),
            end.format(TIMESTAMPTZ_FORMAT),
        ))
    }

    fn midnight(&self, day: NaiveDate) -> Result<DateTime<FixedOffset>, StoreError> {
        day.and_hms_opt(0, 0, 0)
            .and_then(|naive| naive.and_local_timezone(self.offset).single())
            .ok_or_else(|| self.out_of_range())
    }

    fn out_of_range(&self) -> StoreError {
        StoreError::OutOfRange { column: "block_time", value: self.day.to_string() }
    }
}

const TIMESTAMPTZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn offset(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    #[test]
    fn key_follows_the_reference_offset() {
        // 2024-01-01T22:31:04Z
        let utc = offset(0).timestamp_opt(1_704_148_264, 0).unwrap();
        let moscow = utc.with_timezone(&offset(3));
        assert_eq!(PartitionKey::of(&utc).table_name("eth"), "eth_2024_01_01");
        assert_eq!(PartitionKey::of(&moscow).table_name("eth"), "eth_2024_01_02");
    }

    #[test]
    fn create_sql_covers_one_day() {
        let time = offset(3).with_ymd_and_hms(2024, 2, 29, 13, 0, 0).unwrap();
        let sql = PartitionKey::of(&time).create_sql("ethereum_block_metrics").unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS ethereum_block_metrics_2024_02_29 PARTITION OF \
             ethereum_block_metrics FOR VALUES FROM (TIMESTAMPTZ '2024-02-29 00:00:00+03:00') \
             TO (TIMESTAMPTZ '2024-03-01 00:00:00+03:00')"
        );
    }

    #[test]
    fn same_day_same_key() {
        let morning = offset(0).with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let night = offset(0).with_ymd_and_hms(2024, 5, 1, 23, 59, 59).unwrap();
        assert_eq!(PartitionKey::of(&morning), PartitionKey::of(&night));
        assert_eq!(
            PartitionKey::of(&morning).create_sql("t").unwrap(),
            PartitionKey::of(&night).create_sql("t").unwrap()
        );
    }
}
