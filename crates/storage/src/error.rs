use thiserror::Error;

/// A statement, copy or connection against the store failed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No connection could be taken from the pool.
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    /// The pool could not be configured.
    #[error("invalid pool configuration: {0}")]
    Config(String),
    /// The server rejected the statement.
    #[error(
        "sql error {code}: {message} (detail: {}, where: {})",
        detail.as_deref().unwrap_or("-"),
        location.as_deref().unwrap_or("-")
    )]
    Database {
        /// Primary error message
        message: String,
        /// Optional detail message
        detail: Option<String>,
        /// Context in which the error occurred
        location: Option<String>,
        /// SQLSTATE code
        code: String,
    },
    /// Client side or protocol failure.
    #[error("postgres error: {0}")]
    Postgres(tokio_postgres::Error),
    /// A single row of a batch failed; the whole batch was rolled back.
    #[error("row {index} failed: {source}")]
    Row {
        /// Position of the row in the batch
        index: usize,
        /// Cause
        source: Box<StoreError>,
    },
    /// A value does not fit its column type.
    #[error("value {value} out of range for column {column}")]
    OutOfRange {
        /// Column name
        column: &'static str,
        /// Offending value
        value: String,
    },
    /// A table name is not a plain sql identifier.
    #[error("invalid table name {0:?}")]
    InvalidIdentifier(String),
    /// The server did not answer in time.
    #[error("timed out waiting for postgres")]
    Timeout,
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => Self::Database {
                message: db.message().to_owned(),
                detail: db.detail().map(ToOwned::to_owned),
                location: db.where_().map(ToOwned::to_owned),
                code: db.code().code().to_owned(),
            },
            None => Self::Postgres(err),
        }
    }
}

impl StoreError {
    pub(crate) fn row(index: usize, source: impl Into<Self>) -> Self {
        Self::Row { index, source: Box::new(source.into()) }
    }

    /// SQLSTATE code of the underlying server error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => Some(code),
            Self::Row { source, .. } => source.code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_error_exposes_inner_code() {
        let err = StoreError::row(
            3,
            StoreError::Database {
                message: "duplicate key value violates unique constraint".to_owned(),
                detail: Some("Key (block_number)=(7) already exists.".to_owned()),
                location: None,
                code: "23505".to_owned(),
            },
        );
        assert_eq!(err.code(), Some("23505"));
        let rendered = err.to_string();
        assert!(rendered.starts_with("row 3 failed: sql error 23505"));
        assert!(rendered.contains("already exists"));
    }
}
