use indoc::indoc;
use queuectl_job::{ExecutionLog, NewExecutionLog};
use sqlx::{query_as, query_scalar, SqliteExecutor};

use crate::errors::Result;

/// Longest stdout or stderr kept in one log row, in bytes.
pub const MAX_LOG_OUTPUT_BYTES: usize = 64 * 1024;

/// Cuts `output` to at most `MAX_LOG_OUTPUT_BYTES` on a char boundary.
pub(crate) fn truncate_output(output: &str) -> &str {
    if output.len() <= MAX_LOG_OUTPUT_BYTES {
        return output;
    }

    let mut end = MAX_LOG_OUTPUT_BYTES;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    &output[..end]
}

/// Appends one execution record. Returns the new row id.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite", job_id = %log.job_id))]
pub async fn insert_log<'e>(executor: impl SqliteExecutor<'e>, log: &NewExecutionLog) -> Result<i64> {
    let id = query_scalar(indoc! {r#"
        insert into logs (job_id, started_at, finished_at, exit_code, stdout, stderr)
            values (?1, ?2, ?3, ?4, ?5, ?6)
            returning id;
    "#})
    .bind(&log.job_id)
    .bind(log.started_at)
    .bind(log.finished_at)
    .bind(log.exit_code)
    .bind(truncate_output(&log.stdout))
    .bind(truncate_output(&log.stderr))
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// Execution records of a job, oldest first.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite", job_id = %job_id))]
pub async fn list_logs<'e>(executor: impl SqliteExecutor<'e>, job_id: &str) -> Result<Vec<ExecutionLog>> {
    let logs = query_as("select * from logs where job_id = ?1 order by id asc;")
        .bind(job_id)
        .fetch_all(executor)
        .await?;

    Ok(logs)
}
