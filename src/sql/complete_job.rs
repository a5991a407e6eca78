use chrono::{DateTime, Utc};
use indoc::indoc;
use sqlx::{query, SqliteExecutor};

use crate::errors::Result;

/// Marks a job completed and releases its lock.
///
/// Only the worker holding the lock may complete the job. Completing an
/// already completed job is a no-op that still reports success.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite", job_id = %job_id))]
pub async fn complete_job<'e>(
    executor: impl SqliteExecutor<'e>,
    job_id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = query(indoc! {r#"
        update jobs
            set
                state = 'completed',
                locked_by = null,
                locked_at = null,
                updated_at = case when state = 'completed' then updated_at else ?3 end
            where id = ?1
            and ((state = 'processing' and locked_by = ?2) or state = 'completed');
    "#})
    .bind(job_id)
    .bind(worker_id)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}
