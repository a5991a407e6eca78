use queuectl_job::{JobState, QueueSummary};
use sqlx::{query_as, query_scalar, SqlitePool};

use crate::errors::Result;

/// Job counts per state plus the size of the dead letter queue.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite"))]
pub async fn queue_summary(pool: &SqlitePool) -> Result<QueueSummary> {
    let rows: Vec<(JobState, i64)> =
        query_as("select state, count(*) from jobs group by state;")
            .fetch_all(pool)
            .await?;
    let dlq: i64 = query_scalar("select count(*) from dlq;")
        .fetch_one(pool)
        .await?;

    let mut summary = QueueSummary {
        dlq,
        ..QueueSummary::default()
    };
    for (state, count) in rows {
        summary.total += count;
        summary.by_state.insert(state, count);
    }
    summary.pending = summary.count(JobState::Pending);
    summary.active = summary.count(JobState::Processing);

    Ok(summary)
}
