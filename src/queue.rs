use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use getset::Getters;
use queuectl_job::{DlqEntry, ExecutionLog, Job, JobFilter, QueueSummary};
use tokio_util::sync::CancellationToken;

use crate::builder::{QueueOptions, DATABASE_URL_ENV};
use crate::errors::{QueueError, Result};
use crate::job_spec::JobSpec;
use crate::pool::WorkerPool;
use crate::runner::WorkerLoop;
use crate::store::Store;
use crate::supervisor::{PoolState, ProcessSupervisor};

/// Entry point for clients of the queue.
///
/// Cheap to clone; every clone shares the same connection pool.
#[derive(Getters, Clone, Debug)]
#[getset(get = "pub")]
pub struct Queue {
    store: Store,
    idle_interval: Duration,
    state_file: PathBuf,
    /// URL the pool was opened with, forwarded to spawned workers
    database_url: Option<String>,
}

impl Queue {
    pub(crate) fn new(
        store: Store,
        idle_interval: Duration,
        state_file: PathBuf,
        database_url: Option<String>,
    ) -> Self {
        Queue {
            store,
            idle_interval,
            state_file,
            database_url,
        }
    }

    pub fn options() -> QueueOptions {
        QueueOptions::default()
    }

    /// Parses a JSON payload and enqueues it. Returns the job id.
    pub async fn enqueue(&self, payload: &str) -> Result<String> {
        let spec = JobSpec::from_json(payload)?;
        let job = self.enqueue_spec(spec).await?;
        Ok(job.id().clone())
    }

    /// Enqueues a job, filling unset fields from the config table.
    pub async fn enqueue_spec(&self, spec: JobSpec) -> Result<Job> {
        let settings = self.store.settings().await?;
        let job = spec.into_job(&settings, Utc::now())?;
        self.store.insert(&job).await?;
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.store.find(job_id).await
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.store.list_by_state(filter).await
    }

    /// Pending jobs whose `run_at` has passed; ignores retry delays.
    pub async fn list_ready(&self) -> Result<Vec<Job>> {
        self.store.list_ready().await
    }

    pub async fn summary(&self) -> Result<QueueSummary> {
        self.store.summary().await
    }

    pub async fn dlq_list(&self) -> Result<Vec<DlqEntry>> {
        self.store.list_dlq().await
    }

    /// Requeues a dead job. Returns false when it is not in the dead letter queue.
    pub async fn dlq_retry(&self, job_id: &str) -> Result<bool> {
        match self.store.requeue_from_dlq(job_id).await {
            Ok(_) => Ok(true),
            Err(QueueError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.store.config_get(key).await
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.store.config_set(key, value).await
    }

    pub async fn logs(&self, job_id: &str) -> Result<Vec<ExecutionLog>> {
        self.store.list_logs(job_id).await
    }

    /// Releases jobs held in `processing` for longer than `older_than`.
    pub async fn unlock_stale(&self, older_than: Duration) -> Result<u64> {
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|e| QueueError::validation(format!("invalid age: {e}")))?;
        self.store.unlock_stale_jobs(older_than).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear_all().await
    }

    /// A single worker bound to this queue, not yet running.
    pub fn worker(&self, cancel: CancellationToken) -> WorkerLoop {
        WorkerLoop::new(self.store.clone(), cancel).with_idle_interval(self.idle_interval)
    }

    /// Runs `concurrency` workers as tasks of the current process.
    pub fn start_pool(&self, concurrency: usize, cancel: CancellationToken) -> WorkerPool {
        WorkerPool::start_with_token(self.store.clone(), concurrency, self.idle_interval, cancel)
    }

    /// Supervisor for worker processes sharing this queue's database.
    pub fn supervisor(&self) -> ProcessSupervisor {
        let supervisor = ProcessSupervisor::new(self.state_file.clone());
        match &self.database_url {
            Some(url) => supervisor.env(DATABASE_URL_ENV, url),
            None => supervisor,
        }
    }

    /// Spawns `count` worker processes.
    pub fn start_workers(&self, count: usize) -> Result<PoolState> {
        self.supervisor().start(count)
    }

    /// Signals the recorded worker processes to stop. Returns how many were signalled.
    pub fn stop_workers(&self) -> Result<usize> {
        self.supervisor().stop()
    }
}
