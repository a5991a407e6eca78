use chrono::{DateTime, Utc};
use indoc::indoc;
use queuectl_job::{Job, JobFilter};
use sqlx::{query_as, SqliteExecutor};

use crate::errors::Result;

/// Jobs matching `filter`, oldest first.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite"))]
pub async fn list_jobs<'e>(executor: impl SqliteExecutor<'e>, filter: JobFilter) -> Result<Vec<Job>> {
    let jobs = match filter {
        JobFilter::All => {
            query_as("select * from jobs order by created_at asc, rowid asc;")
                .fetch_all(executor)
                .await?
        }
        JobFilter::State(state) => {
            query_as("select * from jobs where state = ?1 order by created_at asc, rowid asc;")
                .bind(state)
                .fetch_all(executor)
                .await?
        }
    };

    Ok(jobs)
}

/// Pending jobs whose `run_at` has passed, in claim order.
///
/// Retry delays (`next_run_at`) are not applied, so this can list jobs the
/// claim query would still skip.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite"))]
pub async fn list_ready<'e>(executor: impl SqliteExecutor<'e>, now: DateTime<Utc>) -> Result<Vec<Job>> {
    let jobs = query_as(indoc! {r#"
        select * from jobs
            where state = 'pending'
            and (run_at is null or run_at <= ?1)
            order by priority desc, created_at asc, rowid asc;
    "#})
    .bind(now)
    .fetch_all(executor)
    .await?;

    Ok(jobs)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite", job_id = %job_id))]
pub async fn find_job<'e>(executor: impl SqliteExecutor<'e>, job_id: &str) -> Result<Option<Job>> {
    let job = query_as("select * from jobs where id = ?1;")
        .bind(job_id)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}
