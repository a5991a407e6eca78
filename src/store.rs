use chrono::{DateTime, Duration, Utc};
use queuectl_job::{DlqEntry, ExecutionLog, Job, JobFilter, NewExecutionLog, QueueSummary};
use queuectl_migrations::migrate;
use sqlx::SqlitePool;

use crate::config::{normalize_key, set_config, QueueSettings};
use crate::errors::{QueueError, Result};
use crate::sql::add_job::add_job;
use crate::sql::clear::clear_all;
use crate::sql::complete_job::complete_job;
use crate::sql::config::get_config_value;
use crate::sql::dead_letter::{list_dlq, move_to_dead, requeue_from_dlq};
use crate::sql::fail_job::fail_job;
use crate::sql::get_job::get_job;
use crate::sql::job_logs::{insert_log, list_logs};
use crate::sql::list_jobs::{find_job, list_jobs, list_ready};
use crate::sql::queue_details::queue_summary;
use crate::sql::unlock_jobs::unlock_stale_jobs;

/// Durable job storage shared by every worker.
///
/// The store is a cheap handle over a connection pool: clone it into each
/// component that needs it. All cross worker coordination goes through
/// [`Store::claim_next`].
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Store { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies pending schema migrations. Safe to call on every start.
    pub async fn migrate(&self) -> Result<()> {
        migrate(&self.pool).await?;
        Ok(())
    }

    /// Inserts a new job. Fails with `DuplicateId` if the id is taken.
    pub async fn insert(&self, job: &Job) -> Result<()> {
        add_job(&self.pool, job).await
    }

    pub async fn find(&self, job_id: &str) -> Result<Option<Job>> {
        find_job(&self.pool, job_id).await
    }

    /// Atomically claims the next eligible job for `worker_id`.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        self.claim_next_at(worker_id, Utc::now()).await
    }

    /// Like [`Store::claim_next`], evaluating eligibility at `now`.
    pub async fn claim_next_at(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        get_job(&self.pool, worker_id, now).await
    }

    /// Returns false when `worker_id` no longer holds the job.
    pub async fn complete(&self, job_id: &str, worker_id: &str) -> Result<bool> {
        complete_job(&self.pool, job_id, worker_id, Utc::now()).await
    }

    /// Returns false when `worker_id` no longer holds the job.
    pub async fn schedule_retry(
        &self,
        job_id: &str,
        worker_id: &str,
        attempts: i64,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        fail_job(&self.pool, job_id, worker_id, attempts, next_run_at, Utc::now()).await
    }

    /// Moves the job to the dead letter queue in one transaction, whoever holds it.
    ///
    /// Fails with `AlreadyDead` when no live job with this id exists.
    pub async fn move_to_dead(&self, job_id: &str, attempts: i64, reason: &str) -> Result<DlqEntry> {
        move_to_dead(&self.pool, job_id, None, attempts, reason, Utc::now())
            .await?
            .ok_or_else(|| QueueError::AlreadyDead(job_id.to_string()))
    }

    /// Like [`Store::move_to_dead`], for the worker holding the job.
    ///
    /// Returns `None` when `worker_id` no longer holds the job.
    pub async fn dead_letter_locked(
        &self,
        job_id: &str,
        worker_id: &str,
        attempts: i64,
        reason: &str,
    ) -> Result<Option<DlqEntry>> {
        move_to_dead(&self.pool, job_id, Some(worker_id), attempts, reason, Utc::now()).await
    }

    /// Deletes the DLQ record and resets the job to pending with no attempts.
    pub async fn requeue_from_dlq(&self, job_id: &str) -> Result<Job> {
        requeue_from_dlq(&self.pool, job_id, Utc::now()).await
    }

    pub async fn list_by_state(&self, filter: JobFilter) -> Result<Vec<Job>> {
        list_jobs(&self.pool, filter).await
    }

    pub async fn list_ready(&self) -> Result<Vec<Job>> {
        list_ready(&self.pool, Utc::now()).await
    }

    pub async fn summary(&self) -> Result<QueueSummary> {
        queue_summary(&self.pool).await
    }

    pub async fn list_dlq(&self) -> Result<Vec<DlqEntry>> {
        list_dlq(&self.pool).await
    }

    pub async fn insert_log(&self, log: &NewExecutionLog) -> Result<i64> {
        insert_log(&self.pool, log).await
    }

    pub async fn list_logs(&self, job_id: &str) -> Result<Vec<ExecutionLog>> {
        list_logs(&self.pool, job_id).await
    }

    pub async fn settings(&self) -> Result<QueueSettings> {
        QueueSettings::load(&self.pool).await
    }

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        get_config_value(&self.pool, &normalize_key(key)).await
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        set_config(&self.pool, key, value).await
    }

    /// Releases jobs locked for longer than `older_than`.
    pub async fn unlock_stale_jobs(&self, older_than: Duration) -> Result<u64> {
        let now = Utc::now();
        unlock_stale_jobs(&self.pool, now - older_than, now).await
    }

    pub async fn clear_all(&self) -> Result<()> {
        clear_all(&self.pool).await
    }
}
