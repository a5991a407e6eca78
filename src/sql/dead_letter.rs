use chrono::{DateTime, Utc};
use indoc::indoc;
use queuectl_job::{DlqEntry, Job};
use sqlx::{query_as, query_scalar, SqliteExecutor, SqlitePool};
use tracing::{error, info};

use crate::errors::{QueueError, Result};

/// Marks a job dead and records it in the dead letter queue.
///
/// Both writes share one transaction: either the job is dead and has a DLQ
/// record, or nothing changed. With `locked_by` set, only a job still held in
/// `processing` by that worker is moved. Returns `None` when no matching live
/// job exists.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite", job_id = %job_id))]
pub async fn move_to_dead(
    pool: &SqlitePool,
    job_id: &str,
    locked_by: Option<&str>,
    attempts: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Option<DlqEntry>> {
    let mut tx = pool.begin().await?;

    let job: Option<Job> = query_as(indoc! {r#"
        update jobs
            set
                state = 'dead',
                attempts = max(attempts, ?2),
                next_run_at = null,
                locked_by = null,
                locked_at = null,
                updated_at = ?3
            where id = ?1
            and state != 'dead'
            and (?4 is null or (state = 'processing' and locked_by = ?4))
            returning *;
    "#})
    .bind(job_id)
    .bind(attempts)
    .bind(now)
    .bind(locked_by)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(job) = job else {
        return Ok(None);
    };

    let entry: DlqEntry = query_as(indoc! {r#"
        insert or replace into dlq (id, command, attempts, max_retries, reason, failed_at)
            values (?1, ?2, ?3, ?4, ?5, ?6)
            returning *;
    "#})
    .bind(job.id())
    .bind(job.command())
    .bind(job.attempts())
    .bind(job.max_retries())
    .bind(reason)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    error!(
        job_id,
        attempts = job.attempts(),
        max_retries = job.max_retries(),
        reason,
        "Job moved to dead letter queue"
    );

    Ok(Some(entry))
}

/// Removes the DLQ record and resets the job for a fresh set of attempts.
///
/// Fails with [`QueueError::NotFound`] when the job has no DLQ record.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite", job_id = %job_id))]
pub async fn requeue_from_dlq(pool: &SqlitePool, job_id: &str, now: DateTime<Utc>) -> Result<Job> {
    let mut tx = pool.begin().await?;

    let removed: Option<String> = query_scalar("delete from dlq where id = ?1 returning id;")
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

    if removed.is_none() {
        return Err(QueueError::NotFound(job_id.to_string()));
    }

    let job: Option<Job> = query_as(indoc! {r#"
        update jobs
            set
                state = 'pending',
                attempts = 0,
                next_run_at = null,
                locked_by = null,
                locked_at = null,
                updated_at = ?2
            where id = ?1
            returning *;
    "#})
    .bind(job_id)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    // A DLQ record without its job row cannot be requeued; dropping the
    // transaction keeps the record.
    let Some(job) = job else {
        return Err(QueueError::NotFound(job_id.to_string()));
    };

    tx.commit().await?;

    info!(job_id, "Job requeued from dead letter queue");

    Ok(job)
}

/// Dead letter records, most recent failure first.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite"))]
pub async fn list_dlq<'e>(executor: impl SqliteExecutor<'e>) -> Result<Vec<DlqEntry>> {
    let entries = query_as(indoc! {r#"
        select id, command, attempts, max_retries, reason, failed_at
            from dlq
            order by failed_at desc, id asc;
    "#})
    .fetch_all(executor)
    .await?;

    Ok(entries)
}
