//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Upserts**: Counters accumulate inside the database, so concurrent
//!   writers never lose an increment
//! - **Retries**: Every statement runs through a [`RetryPolicy`]; lock
//!   contention (`SQLITE_BUSY`/`SQLITE_LOCKED`) counts as transient
//!
//! ## Transactions
//!
//! [`StorageBackend::begin_batch`] opens a transaction on a pooled
//! connection. SQLite transactions are serializable, so a committed batch is
//! observed as a whole or not at all. A batch that is dropped without
//! committing is rolled back by sqlx.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, Transaction};
use tracing::{debug, info, instrument, warn};

use super::backend::{Batch, Snapshot, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    CREATE_METRICS_TABLE, MetricRow, REPLACE_COUNTER, SELECT_BY_KIND, SELECT_ONE, UPSERT_COUNTER,
    UPSERT_GAUGE,
};
use crate::metric::{MetricKind, MetricRecord};
use crate::retry::RetryPolicy;

/// SQLite storage backend
///
/// This backend stores metrics in a local SQLite database file.
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
    retry: RetryPolicy,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Create the `metrics` table if it doesn't exist
    /// 3. Configure SQLite for concurrent access (WAL mode, busy timeout)
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use tally::retry::RetryPolicy;
    /// # use tally::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./metrics.db", RetryPolicy::default()).await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>, retry: RetryPolicy) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("SQLite connection pool created");

        retry
            .run(|| async {
                sqlx::query(CREATE_METRICS_TABLE)
                    .execute(&pool)
                    .await
                    .map_err(StorageError::from)
            })
            .await?;

        info!("metrics table ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
            retry,
        })
    }

    fn decode_row(row: &SqliteRow) -> StorageResult<MetricRow> {
        let kind: String = row.try_get("kind")?;
        let kind = kind
            .parse::<MetricKind>()
            .map_err(|_| StorageError::QueryFailed(format!("unknown metric kind in table: {kind}")))?;

        Ok(MetricRow {
            id: row.try_get("id")?,
            kind,
            delta: row.try_get("delta")?,
            value: row.try_get("value")?,
        })
    }

    async fn fetch_kind(&self, kind: MetricKind) -> StorageResult<Vec<MetricRecord>> {
        let rows = self
            .retry
            .run(|| async {
                sqlx::query(SELECT_BY_KIND)
                    .bind(kind.as_str())
                    .fetch_all(&self.pool)
                    .await
                    .map_err(StorageError::from)
            })
            .await?;

        rows.iter()
            .map(|row| Self::decode_row(row).map(MetricRecord::from))
            .collect()
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self))]
    async fn save_gauge(&self, id: &str, value: f64) -> StorageResult<()> {
        self.retry
            .run(|| async {
                sqlx::query(UPSERT_GAUGE)
                    .bind(id)
                    .bind(value)
                    .execute(&self.pool)
                    .await
                    .map_err(StorageError::from)
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn save_counter(&self, id: &str, delta: i64) -> StorageResult<i64> {
        // an overflowing sum must not be committed, so the upsert gets its own transaction
        self.retry
            .run(|| async {
                let mut tx = self.pool.begin().await?;
                let total = sqlx::query_scalar::<_, i64>(UPSERT_COUNTER)
                    .bind(id)
                    .bind(delta)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| counter_error(id, e))?;
                tx.commit().await?;
                Ok::<_, StorageError>(total)
            })
            .await
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str, kind: MetricKind) -> StorageResult<Option<MetricRecord>> {
        let row = self
            .retry
            .run(|| async {
                sqlx::query(SELECT_ONE)
                    .bind(id)
                    .bind(kind.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(StorageError::from)
            })
            .await?;

        row.as_ref()
            .map(|row| Self::decode_row(row).map(MetricRecord::from))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self, kind: MetricKind) -> StorageResult<Vec<MetricRecord>> {
        let records = self.fetch_kind(kind).await?;
        debug!("listed {} {} metrics", records.len(), kind);
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn ping(&self) -> bool {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!("health check failed: {}", e);
                false
            }
        }
    }

    async fn snapshot(&self) -> StorageResult<Snapshot> {
        let counters: BTreeMap<String, i64> = self
            .fetch_kind(MetricKind::Counter)
            .await?
            .into_iter()
            .map(|record| (record.id, record.delta.unwrap_or(0)))
            .collect();

        let gauges: BTreeMap<String, f64> = self
            .fetch_kind(MetricKind::Gauge)
            .await?
            .into_iter()
            .map(|record| (record.id, record.value.unwrap_or(0.0)))
            .collect();

        Ok(Snapshot { counters, gauges })
    }

    #[instrument(skip(self, snapshot), fields(count = snapshot.len()))]
    async fn restore(&self, snapshot: Snapshot) -> StorageResult<()> {
        self.retry
            .run(|| async {
                let mut tx = self.pool.begin().await?;

                for (id, total) in &snapshot.counters {
                    sqlx::query(REPLACE_COUNTER)
                        .bind(id)
                        .bind(*total)
                        .execute(&mut *tx)
                        .await?;
                }

                for (id, value) in &snapshot.gauges {
                    sqlx::query(UPSERT_GAUGE)
                        .bind(id)
                        .bind(*value)
                        .execute(&mut *tx)
                        .await?;
                }

                tx.commit().await.map_err(StorageError::from)
            })
            .await
    }

    async fn begin_batch<'a>(&'a self) -> StorageResult<Box<dyn Batch + 'a>> {
        let tx = self
            .retry
            .run(|| async { self.pool.begin().await.map_err(StorageError::from) })
            .await?;

        Ok(Box::new(SqliteBatch { tx }))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend at {}", self.db_path);
        self.pool.close().await;
        Ok(())
    }
}

/// SQLite turns an overflowing integer sum into a REAL, which then fails
/// to decode as the returned total
fn counter_error(id: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::ColumnDecode { .. } => StorageError::CounterOverflow(id.to_string()),
        err => err.into(),
    }
}

/// Batch backed by an open transaction
struct SqliteBatch {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl Batch for SqliteBatch {
    async fn save_gauge(&mut self, id: &str, value: f64) -> StorageResult<()> {
        sqlx::query(UPSERT_GAUGE)
            .bind(id)
            .bind(value)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn save_counter(&mut self, id: &str, delta: i64) -> StorageResult<i64> {
        sqlx::query_scalar::<_, i64>(UPSERT_COUNTER)
            .bind(id)
            .bind(delta)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| counter_error(id, e))
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        true
    }
}
