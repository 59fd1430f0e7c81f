//! SQLite-backed repository.

use super::{migrations, Repository};
use crate::error::{PulseError, Result};
use crate::types::{MetricKind, MetricName, MetricRecord, MetricValue, Metrics};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{info, instrument};

const SELECT_ONE: &str =
    "SELECT value_gauge, value_counter FROM metrics WHERE metric_name = ? LIMIT 1";
const SELECT_ALL: &str = "SELECT metric_name, value_gauge, value_counter FROM metrics";
const SELECT_KIND: &str = "SELECT metric_type FROM metrics WHERE metric_name = ?";

// Upserts only touch a conflicting row of the same type. SQLite promotes an overflowing
// integer sum to REAL, so counter writes also require the sum to stay an integer.
// Zero affected rows is diagnosed by `refusal`.
const UPSERT_GAUGE: &str = r#"
    INSERT INTO metrics (metric_name, metric_type, value_gauge) VALUES (?, 'gauge', ?)
    ON CONFLICT (metric_name) DO UPDATE SET value_gauge = excluded.value_gauge
    WHERE metrics.metric_type = excluded.metric_type
"#;
const UPSERT_COUNTER: &str = r#"
    INSERT INTO metrics (metric_name, metric_type, value_counter) VALUES (?, 'counter', ?)
    ON CONFLICT (metric_name) DO UPDATE
        SET value_counter = metrics.value_counter + excluded.value_counter
    WHERE metrics.metric_type = excluded.metric_type
        AND typeof(metrics.value_counter + excluded.value_counter) = 'integer'
"#;
const UPDATE_GAUGE: &str =
    "UPDATE metrics SET value_gauge = ? WHERE metric_name = ? AND metric_type = 'gauge'";
const UPDATE_COUNTER: &str = "UPDATE metrics SET value_counter = value_counter + ? \
     WHERE metric_name = ? AND metric_type = 'counter' \
     AND typeof(value_counter + ?) = 'integer'";

/// Repository over a single `metrics` table.
#[derive(Clone)]
pub struct SqlRepository {
    pool: SqlitePool,
}

fn db_error(operation: &'static str) -> impl Fn(sqlx::Error) -> PulseError {
    move |e| {
        metrics::counter!("pulse_db_errors_total", "operation" => operation).increment(1);
        PulseError::database(e)
    }
}

fn row_to_record(name: MetricName, row: &SqliteRow) -> Result<MetricRecord> {
    let gauge: Option<f64> = row.try_get("value_gauge").map_err(PulseError::database)?;
    let counter: Option<i64> = row.try_get("value_counter").map_err(PulseError::database)?;
    match (gauge, counter) {
        (Some(v), None) => Ok(MetricRecord::gauge(name, v)),
        (None, Some(d)) => Ok(MetricRecord::counter(name, d)),
        _ => Err(PulseError::DatabaseError(format!("metric {} has no single value", name))),
    }
}

async fn stored_kind(
    conn: &mut SqliteConnection,
    name: &MetricName,
) -> Result<Option<MetricKind>> {
    let kind: Option<String> = sqlx::query_scalar(SELECT_KIND)
        .bind(name.as_str())
        .fetch_optional(conn)
        .await
        .map_err(db_error("get_kind"))?;
    kind.as_deref().map(MetricKind::from_str).transpose()
}

/// Explain why a write of `incoming` to `name` touched no row.
async fn refusal(
    conn: &mut SqliteConnection,
    name: &MetricName,
    incoming: MetricKind,
) -> PulseError {
    match stored_kind(conn, name).await {
        Ok(Some(stored)) if stored != incoming => {
            PulseError::KindMismatch { name: name.to_string(), stored, incoming }
        }
        // Same kind but refused: only the counter overflow guard does that
        Ok(Some(_)) => PulseError::CounterOverflow { name: name.to_string() },
        Ok(None) => PulseError::MetricNotFound { name: name.to_string() },
        Err(e) => e,
    }
}

/// Insert `record`, or fold it into the existing row of the same kind.
async fn upsert_record(conn: &mut SqliteConnection, record: &MetricRecord) -> Result<()> {
    let name = record.name.as_str();
    let result = match record.value {
        MetricValue::Gauge(v) => {
            sqlx::query(UPSERT_GAUGE).bind(name).bind(v).execute(&mut *conn).await
        }
        MetricValue::Counter(d) => {
            sqlx::query(UPSERT_COUNTER).bind(name).bind(d).execute(&mut *conn).await
        }
    }
    .map_err(db_error("insert"))?;

    if result.rows_affected() == 0 {
        return Err(refusal(conn, &record.name, record.kind()).await);
    }
    Ok(())
}

/// Mutate the existing row of `value`'s kind in place.
async fn update_row(
    conn: &mut SqliteConnection,
    name: &MetricName,
    value: MetricValue,
) -> Result<()> {
    let result = match value {
        MetricValue::Gauge(v) => {
            sqlx::query(UPDATE_GAUGE).bind(v).bind(name.as_str()).execute(&mut *conn).await
        }
        MetricValue::Counter(d) => {
            sqlx::query(UPDATE_COUNTER)
                .bind(d)
                .bind(name.as_str())
                .bind(d)
                .execute(&mut *conn)
                .await
        }
    }
    .map_err(db_error("update"))?;

    if result.rows_affected() == 0 {
        return Err(refusal(conn, name, value.kind()).await);
    }
    Ok(())
}

impl SqlRepository {
    /// Connect to the database at `dsn` (a SQLite URL) and run migrations.
    #[instrument(skip(dsn))]
    pub async fn connect(dsn: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| PulseError::InvalidConfig { reason: format!("Invalid DSN: {}", e) })?
            .create_if_missing(true);

        // Every connection to an in-memory database sees its own database, so the pool
        // must hold exactly one long-lived connection.
        let in_memory = dsn.contains(":memory:") || dsn.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await.map_err(PulseError::database)?;

        migrations::run(&pool).await?;
        info!("SQL repository ready");
        Ok(Self { pool })
    }

    /// Create a repository backed by a private in-memory database (for tests).
    pub async fn new_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Repository for SqlRepository {
    #[instrument(skip(self), fields(metric = %name))]
    async fn get(&self, name: &MetricName) -> Result<Option<MetricRecord>> {
        let row = sqlx::query(SELECT_ONE)
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get"))?;
        row.map(|row| row_to_record(name.clone(), &row)).transpose()
    }

    /// Atomic upsert: a colliding insert of the same counter adds rather than replaces.
    #[instrument(skip(self), fields(metric = %record.name))]
    async fn insert(&self, record: MetricRecord) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(db_error("acquire"))?;
        upsert_record(&mut conn, &record).await
    }

    #[instrument(skip(self), fields(metric = %existing.name))]
    async fn update(&self, existing: &MetricRecord, value: MetricValue) -> Result<()> {
        if existing.kind() != value.kind() {
            return Err(PulseError::KindMismatch {
                name: existing.name.to_string(),
                stored: existing.kind(),
                incoming: value.kind(),
            });
        }
        let mut conn = self.pool.acquire().await.map_err(db_error("acquire"))?;
        update_row(&mut conn, &existing.name, value).await
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> Result<HashMap<MetricName, MetricRecord>> {
        let rows =
            sqlx::query(SELECT_ALL).fetch_all(&self.pool).await.map_err(db_error("get_all"))?;
        let mut metrics = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("metric_name").map_err(PulseError::database)?;
            let name = MetricName::new(name);
            metrics.insert(name.clone(), row_to_record(name, &row)?);
        }
        Ok(metrics)
    }

    /// All-or-nothing: any failing entry rolls the whole batch back.
    ///
    /// The same statement strings are executed for every entry, so the connection's
    /// statement cache prepares each of them once per batch.
    #[instrument(skip(self, metrics), fields(count = metrics.len()))]
    async fn batch_update(&self, metrics: &[Metrics]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin"))?;

        for metric in metrics {
            let record = MetricRecord::try_from(metric)?;
            match stored_kind(&mut tx, &record.name).await? {
                Some(stored) if stored != record.kind() => {
                    return Err(PulseError::KindMismatch {
                        name: record.name.to_string(),
                        stored,
                        incoming: record.kind(),
                    });
                }
                Some(_) => update_row(&mut tx, &record.name, record.value).await?,
                None => upsert_record(&mut tx, &record).await?,
            }
        }

        tx.commit().await.map_err(db_error("commit"))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(db_error("ping"))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
