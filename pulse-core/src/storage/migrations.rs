//! Schema setup for the SQL backend.
//!
//! Each entry of [`STEPS`] brings the schema to the next version. Applied versions
//! are recorded in `schema_version`; a step and its record commit together.

use crate::error::{PulseError, Result};
use sqlx::SqlitePool;
use tracing::{debug, info, instrument};

/// Statements of schema version `index + 1`.
const STEPS: &[&[&str]] = &[&[
    r#"
    CREATE TABLE IF NOT EXISTS metrics (
        metric_name VARCHAR(255) NOT NULL
            CHECK (length(metric_name) BETWEEN 1 AND 255),
        metric_type VARCHAR(7) NOT NULL
            CHECK (metric_type IN ('gauge', 'counter')),
        value_gauge DOUBLE PRECISION DEFAULT NULL,
        value_counter BIGINT DEFAULT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS metrics_metric_name ON metrics (metric_name)",
]];

fn failed(e: sqlx::Error) -> PulseError {
    PulseError::MigrationFailed { reason: e.to_string() }
}

/// Version the schema reaches once every step is applied.
pub fn latest() -> i64 {
    STEPS.len() as i64
}

/// Highest recorded version, zero for a fresh database.
pub async fn current_version(pool: &SqlitePool) -> Result<i64> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)")
        .execute(pool)
        .await
        .map_err(failed)?;
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(failed)?;
    Ok(version.unwrap_or(0))
}

/// Apply every step above the recorded version.
#[instrument(skip(pool))]
pub async fn run(pool: &SqlitePool) -> Result<()> {
    let from = current_version(pool).await?;
    let pending = STEPS.iter().zip(1..).skip_while(|(_, version)| *version <= from);

    let mut applied = 0;
    for (statements, version) in pending {
        let mut tx = pool.begin().await.map_err(failed)?;
        for statement in *statements {
            sqlx::query(statement).execute(&mut *tx).await.map_err(failed)?;
        }
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(failed)?;
        tx.commit().await.map_err(failed)?;
        debug!(version, "Schema step applied");
        applied += 1;
    }

    match applied {
        0 => debug!(version = from, "Schema already current"),
        _ => info!(from, to = latest(), "Schema upgraded"),
    }
    Ok(())
}
