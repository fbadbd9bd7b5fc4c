//! In-memory [`Store`] recording every call, for tests.
use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::{ColumnDef, SqlValue, Store, StoreError};

/// A call received by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    /// [`Store::execute`]
    Execute {
        /// Statement
        sql: String,
        /// Bind parameters
        params: Vec<SqlValue>,
    },
    /// [`Store::batch_execute`]
    Batch {
        /// Statement
        sql: String,
        /// One parameter list per row
        rows: Vec<Vec<SqlValue>>,
    },
    /// [`Store::bulk_copy`]
    Copy {
        /// Target table
        table: String,
        /// Column names
        columns: Vec<&'static str>,
        /// Copied rows
        rows: Vec<Vec<SqlValue>>,
    },
}

/// Recording store. Calls whose statement or table contains the configured
/// pattern fail with a synthetic database error.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Recorded>>,
    fail_pattern: Mutex<Option<String>>,
    failures: AtomicUsize,
}

impl MemoryStore {
    /// Fail every call whose sql or table name contains `pattern`.
    pub fn fail_matching(&self, pattern: impl Into<String>) {
        *self.fail_pattern.lock().unwrap() = Some(pattern.into());
    }

    /// Every successful call, in order.
    pub fn records(&self) -> Vec<Recorded> {
        self.records.lock().unwrap().clone()
    }

    /// Number of injected failures so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Names of the partitions created, in order.
    pub fn partitions_created(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                Recorded::Execute { sql, .. } if sql.contains("PARTITION OF") => {
                    sql.split_whitespace().nth(5).map(ToOwned::to_owned)
                }
                _ => None,
            })
            .collect()
    }

    /// Block numbers written by any insert path, in order.
    pub fn block_numbers(&self) -> Vec<i64> {
        let first_column = |row: &Vec<SqlValue>| match row.first() {
            Some(SqlValue::BigInt(number)) => Some(*number),
            _ => None,
        };
        self.records()
            .iter()
            .flat_map(|record| match record {
                Recorded::Execute { sql, params } if sql.starts_with("INSERT") => {
                    first_column(params).into_iter().collect::<Vec<_>>()
                }
                Recorded::Batch { rows, .. } | Recorded::Copy { rows, .. } => {
                    rows.iter().filter_map(first_column).collect()
                }
                Recorded::Execute { .. } => Vec::new(),
            })
            .collect()
    }

    fn check(&self, target: &str) -> Result<(), StoreError> {
        let pattern = self.fail_pattern.lock().unwrap();
        match pattern.as_deref() {
            Some(pattern) if target.contains(pattern) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Database {
                    message: format!("injected failure for {pattern}"),
                    detail: None,
                    location: None,
                    code: "XX000".to_owned(),
                })
            }
            _ => Ok(()),
        }
    }

    fn record(&self, record: Recorded) {
        self.records.lock().unwrap().push(record);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, StoreError> {
        self.check(sql)?;
        self.record(Recorded::Execute { sql: sql.to_owned(), params: params.to_vec() });
        Ok(1)
    }

    async fn batch_execute(&self, sql: &str, rows: Vec<Vec<SqlValue>>) -> Result<u64, StoreError> {
        self.check(sql)?;
        let count = rows.len() as u64;
        self.record(Recorded::Batch { sql: sql.to_owned(), rows });
        Ok(count)
    }

    async fn bulk_copy(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: Vec<Vec<SqlValue>>,
    ) -> Result<u64, StoreError> {
        self.check(&format!("COPY {table}"))?;
        let count = rows.len() as u64;
        let columns = columns.iter().map(|column| column.name).collect();
        self.record(Recorded::Copy { table: table.to_owned(), columns, rows });
        Ok(count)
    }
}
