use chrono::{DateTime, Utc};
use indoc::indoc;
use sqlx::{query, SqliteExecutor};
use tracing::warn;

use crate::errors::Result;

/// Releases jobs stuck in `processing` since before `locked_before`.
///
/// Used to recover work held by a worker that died without releasing it.
/// Attempts are left untouched. Returns how many jobs were released.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite"))]
pub async fn unlock_stale_jobs<'e>(
    executor: impl SqliteExecutor<'e>,
    locked_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = query(indoc! {r#"
        update jobs
            set
                state = 'pending',
                locked_by = null,
                locked_at = null,
                updated_at = ?2
            where state = 'processing'
            and locked_at <= ?1;
    "#})
    .bind(locked_before)
    .bind(now)
    .execute(executor)
    .await?;

    let released = result.rows_affected();
    if released > 0 {
        warn!(released, "Released stale job locks");
    }

    Ok(released)
}
