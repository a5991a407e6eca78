use chrono::{DateTime, Utc};
use indoc::indoc;
use queuectl_job::Job;
use sqlx::{query_as, SqliteExecutor};

use crate::errors::Result;

/// Claims the next eligible job for `worker_id`.
///
/// Selection and locking happen in one statement. SQLite runs one writer at a
/// time, so two concurrent callers can never both see the row as pending.
/// The outer `state = 'pending'` guard keeps the update a no-op if the row
/// changed between the subquery and the write.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite", worker_id = %worker_id))]
pub async fn get_job<'e>(
    executor: impl SqliteExecutor<'e>,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Job>> {
    let job = query_as::<_, Job>(indoc! {r#"
        update jobs
            set
                state = 'processing',
                locked_by = ?1,
                locked_at = ?2,
                updated_at = ?2
            where id = (
                select id from jobs
                    where state = 'pending'
                    and (run_at is null or run_at <= ?2)
                    and (next_run_at is null or next_run_at <= ?2)
                    order by priority desc, created_at asc, rowid asc
                    limit 1
            )
            and state = 'pending'
            returning *;
    "#})
    .bind(worker_id)
    .bind(now)
    .fetch_optional(executor)
    .await?;

    Ok(job)
}
