use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use derive_more::Debug;
use futures::future::try_join_all;
use tokio::time::timeout;
use tokio_postgres::{NoTls, binary_copy::BinaryCopyInWriter, types::Type};
use tokio_retry::{Retry, strategy::FixedInterval};
use tracing::{info, trace, warn};

use crate::{
    ColumnDef, SqlValue, Store, StoreError,
    schema::one_line,
    store::as_params,
};

/// Connection attempts made at startup.
const CONNECT_ATTEMPTS: usize = 3;

/// Pause between connection attempts.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound for a single connectivity check.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// [`Store`] backed by a `deadpool-postgres` connection pool.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    #[debug(skip)]
    pool: Pool,
}

impl PostgresStore {
    /// Build the pool and check connectivity, retrying a few times before
    /// giving up.
    pub async fn connect(
        host: &str,
        port: u16,
        db: &str,
        user: &str,
        password: &str,
    ) -> Result<Self, StoreError> {
        let mut cfg = Config::new();
        cfg.host = Some(host.to_owned());
        cfg.port = Some(port);
        cfg.dbname = Some(db.to_owned());
        cfg.user = Some(user.to_owned());
        cfg.password = Some(password.to_owned());
        cfg.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|err| StoreError::Config(err.to_string()))?;
        let store = Self { pool };

        let strategy = FixedInterval::new(CONNECT_RETRY_INTERVAL).take(CONNECT_ATTEMPTS - 1);
        Retry::spawn(strategy, || async {
            store.ping().await.inspect_err(|err| {
                warn!(%host, port, db, error = %err, "postgres connection attempt failed");
            })
        })
        .await?;

        info!(%host, port, db, "connected to postgres");
        Ok(store)
    }

    /// Check that a connection can be taken and answers a trivial query.
    pub async fn ping(&self) -> Result<(), StoreError> {
        timeout(PING_TIMEOUT, async {
            let client = self.pool.get().await?;
            client.simple_query("SELECT 1").await?;
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|_| StoreError::Timeout)?
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, StoreError> {
        trace!(sql = %one_line(sql), "execute");
        let client = self.pool.get().await?;
        Ok(client.execute(sql, &as_params(params)).await?)
    }

    async fn batch_execute(&self, sql: &str, rows: Vec<Vec<SqlValue>>) -> Result<u64, StoreError> {
        trace!(sql = %one_line(sql), rows = rows.len(), "batch execute");
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let statement = tx.prepare(sql).await?;

        let params: Vec<_> = rows.iter().map(|row| as_params(row)).collect();
        // Queued on the same connection, so the statements are pipelined.
        let affected = try_join_all(params.iter().enumerate().map(|(index, row)| {
            let (tx, statement) = (&tx, &statement);
            async move { tx.execute(statement, row).await.map_err(|err| StoreError::row(index, err)) }
        }))
        .await?;

        tx.commit().await?;
        Ok(affected.into_iter().sum())
    }

    async fn bulk_copy(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: Vec<Vec<SqlValue>>,
    ) -> Result<u64, StoreError> {
        let names = columns.iter().map(|column| column.name).collect::<Vec<_>>().join(", ");
        let sql = format!("COPY {table} ({names}) FROM STDIN BINARY");
        trace!(sql = %sql, rows = rows.len(), "bulk copy");

        let types: Vec<Type> = columns.iter().map(|column| column.ty.clone()).collect();
        let client = self.pool.get().await?;
        let sink = client.copy_in(sql.as_str()).await?;
        let writer = BinaryCopyInWriter::new(sink, &types);
        let mut writer = std::pin::pin!(writer);
        for (index, row) in rows.iter().enumerate() {
            writer.as_mut().write(&as_params(row)).await.map_err(|err| StoreError::row(index, err))?;
        }
        Ok(writer.finish().await?)
    }
}
