use chrono::{DateTime, Utc};
use indoc::indoc;
use sqlx::{query, SqliteExecutor};

use crate::errors::Result;

/// Puts a failed job back to pending, eligible again at `next_run_at`.
///
/// `attempts` never decreases, even if a smaller value is passed.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite", job_id = %job_id))]
pub async fn fail_job<'e>(
    executor: impl SqliteExecutor<'e>,
    job_id: &str,
    worker_id: &str,
    attempts: i64,
    next_run_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = query(indoc! {r#"
        update jobs
            set
                state = 'pending',
                attempts = max(attempts, ?3),
                next_run_at = ?4,
                locked_by = null,
                locked_at = null,
                updated_at = ?5
            where id = ?1
            and state = 'processing'
            and locked_by = ?2;
    "#})
    .bind(job_id)
    .bind(worker_id)
    .bind(attempts)
    .bind(next_run_at)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}
