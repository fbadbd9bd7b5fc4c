use std::{error::Error, fmt::Debug};

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, FixedOffset};
use tokio_postgres::types::{IsNull, ToSql, Type};

use crate::StoreError;

/// A single bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// `BIGINT`
    BigInt(i64),
    /// `INTEGER`
    Int(i32),
    /// `DOUBLE PRECISION`
    Double(f64),
    /// `TEXT`
    Text(String),
    /// `TIMESTAMPTZ`
    TimestampTz(DateTime<FixedOffset>),
    /// `DOUBLE PRECISION[]`
    DoubleArray(Vec<f64>),
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Self::BigInt(v) => v.to_sql(ty, out),
            Self::Int(v) => v.to_sql(ty, out),
            Self::Double(v) => v.to_sql(ty, out),
            Self::Text(v) => v.to_sql(ty, out),
            Self::TimestampTz(v) => v.to_sql(ty, out),
            Self::DoubleArray(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <i64 as ToSql>::accepts(ty) ||
            <i32 as ToSql>::accepts(ty) ||
            <f64 as ToSql>::accepts(ty) ||
            <String as ToSql>::accepts(ty) ||
            <DateTime<FixedOffset> as ToSql>::accepts(ty) ||
            <Vec<f64> as ToSql>::accepts(ty)
    }

    // Type checks are done per variant, so a value is never encoded for a
    // column type its variant does not accept.
    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Self::BigInt(v) => v.to_sql_checked(ty, out),
            Self::Int(v) => v.to_sql_checked(ty, out),
            Self::Double(v) => v.to_sql_checked(ty, out),
            Self::Text(v) => v.to_sql_checked(ty, out),
            Self::TimestampTz(v) => v.to_sql_checked(ty, out),
            Self::DoubleArray(v) => v.to_sql_checked(ty, out),
        }
    }
}

/// Column name and wire type, as needed by binary `COPY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name
    pub name: &'static str,
    /// Postgres type
    pub ty: Type,
}

/// Minimal relational driver surface used by the writer.
#[async_trait]
pub trait Store: Send + Sync + Debug {
    /// Run a single statement, returning the number of affected rows.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, StoreError>;

    /// Run `sql` once per parameter row inside one transaction. A failing row
    /// aborts the whole batch and is reported as [`StoreError::Row`].
    async fn batch_execute(&self, sql: &str, rows: Vec<Vec<SqlValue>>) -> Result<u64, StoreError>;

    /// Stream `rows` into `table` with a binary `COPY ... FROM STDIN`.
    async fn bulk_copy(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: Vec<Vec<SqlValue>>,
    ) -> Result<u64, StoreError>;
}

/// Borrow a row as the parameter slice expected by `tokio-postgres`.
pub(crate) fn as_params(row: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    row.iter().map(|value| value as &(dyn ToSql + Sync)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_are_checked_against_column_type() {
        let mut out = BytesMut::new();
        assert!(SqlValue::BigInt(1).to_sql_checked(&Type::INT8, &mut out).is_ok());
        assert!(SqlValue::BigInt(1).to_sql_checked(&Type::TEXT, &mut out).is_err());
        assert!(SqlValue::DoubleArray(vec![1.0]).to_sql_checked(&Type::FLOAT8_ARRAY, &mut out).is_ok());
        assert!(SqlValue::Text("0xabc".to_owned()).to_sql_checked(&Type::FLOAT8, &mut out).is_err());
    }
}
