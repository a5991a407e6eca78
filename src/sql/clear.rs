use sqlx::{query, SqlitePool};
use tracing::warn;

use crate::errors::Result;

/// Deletes every job, dead letter record and execution log. Config is kept.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite"))]
pub async fn clear_all(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for stmt in ["delete from logs;", "delete from dlq;", "delete from jobs;"] {
        query(stmt).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    warn!("Cleared all jobs, dead letter records and logs");
    Ok(())
}
