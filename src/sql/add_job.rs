use indoc::indoc;
use queuectl_job::Job;
use sqlx::{query, SqliteExecutor};
use tracing::info;

use crate::errors::{QueueError, Result};

/// Add a job to the queue
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite", job_id = %job.id()))]
pub async fn add_job<'e>(executor: impl SqliteExecutor<'e>, job: &Job) -> Result<()> {
    let result = query(indoc! {r#"
        insert into jobs (
            id, command, state, attempts, max_retries, backoff_base, priority,
            run_at, next_run_at, locked_by, locked_at, created_at, updated_at
        )
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);
    "#})
    .bind(job.id())
    .bind(job.command())
    .bind(job.state())
    .bind(job.attempts())
    .bind(job.max_retries())
    .bind(job.backoff_base())
    .bind(job.priority())
    .bind(job.run_at())
    .bind(job.next_run_at())
    .bind(job.locked_by())
    .bind(job.locked_at())
    .bind(job.created_at())
    .bind(job.updated_at())
    .execute(executor)
    .await;

    match result {
        Ok(_) => {
            info!(
                job_id = %job.id(),
                command = %job.command(),
                priority = job.priority(),
                "Job added to queue"
            );
            Ok(())
        }
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(QueueError::DuplicateId(job.id().clone()))
        }
        Err(e) => Err(e.into()),
    }
}
