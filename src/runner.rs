use std::time::{Duration, Instant};

use chrono::Utc;
use getset::Getters;
use queuectl_job::{Job, NewExecutionLog};
use rand::RngCore;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::{next_run_at, RetryDecision, RetryPolicy};
use crate::config::QueueSettings;
use crate::errors::QueueError;
use crate::executor::run_command;
use crate::store::Store;

/// How long an idle worker waits before polling again.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(300);

/// Where a worker is in its lifecycle.
///
/// ```text
/// IdlePolling --claim--> Executing --run--> Releasing --release--> IdlePolling
///      |                                        |
///      +----stop signal-------------------------+--> Stopping --> Terminated
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Asking the store for work, sleeping between empty polls
    IdlePolling,
    /// Holding the lock on a claimed job whose command has not run yet
    Executing(Job),
    /// The command ran; its outcome still has to be written to the store.
    /// A failed write is retried from here without running the command again.
    Releasing {
        job: Job,
        decision: RetryDecision,
        exit_code: i32,
    },
    /// Stop requested; no further claims
    Stopping,
    Terminated,
}

/// Outcome of one job run by a worker.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct ProcessedJob {
    job_id: String,
    exit_code: i32,
    decision: RetryDecision,
}

/// Error that occurs when trying to mark a job as completed, retried or dead.
#[derive(Error, Debug)]
#[error("Failed to release job '{job_id}'. {source}")]
pub struct ReleaseJobError {
    job_id: String,
    #[source]
    source: QueueError,
}

/// Errors that can occur while a worker is running.
///
/// Failing commands are not errors; only store failures surface here.
#[derive(Error, Debug)]
pub enum WorkerRuntimeError {
    /// Failed to claim the next job
    #[error("An error occured while fetching a job to run : '{0}'")]
    GetJob(#[source] QueueError),
    /// Failed to record the outcome of a job
    #[error("An error occured while releasing a job : '{0}'")]
    ReleaseJob(#[from] ReleaseJobError),
}

/// Random worker identifier, e.g. `worker_3fa1c2…`.
pub fn generate_worker_id() -> String {
    let mut random_bytes = [0u8; 9];
    rand::rng().fill_bytes(&mut random_bytes);
    format!("worker_{}", hex::encode(random_bytes))
}

/// A single cooperative worker.
///
/// The loop is an explicit state machine: [`WorkerLoop::step`] performs one
/// transition, [`WorkerLoop::run`] steps until the worker terminates.
/// Cancelling the token never interrupts a running command; a claimed job is
/// always released before the worker stops.
#[derive(Getters)]
pub struct WorkerLoop {
    #[getset(get = "pub")]
    worker_id: String,
    store: Store,
    policy: RetryPolicy,
    idle_interval: Duration,
    cancel: CancellationToken,
    #[getset(get = "pub")]
    state: WorkerState,
}

impl WorkerLoop {
    pub fn new(store: Store, cancel: CancellationToken) -> Self {
        WorkerLoop {
            worker_id: generate_worker_id(),
            store,
            policy: RetryPolicy::default(),
            idle_interval: DEFAULT_IDLE_INTERVAL,
            cancel,
            state: WorkerState::IdlePolling,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Asks the worker to stop after its current job, if any.
    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, WorkerState::Terminated)
    }

    /// Performs one state transition.
    ///
    /// On error the state is left where a retry makes sense: a failed claim
    /// stays in `IdlePolling`, a failed release stays in `Releasing`.
    pub async fn step(&mut self) -> Result<(), WorkerRuntimeError> {
        match &self.state {
            WorkerState::IdlePolling => {
                if self.cancel.is_cancelled() {
                    self.state = WorkerState::Stopping;
                    return Ok(());
                }

                let job = self
                    .store
                    .claim_next(&self.worker_id)
                    .await
                    .map_err(WorkerRuntimeError::GetJob)?;

                match job {
                    Some(job) => {
                        info!(
                            worker_id = %self.worker_id,
                            job_id = %job.id(),
                            attempts = job.attempts(),
                            "Job claimed"
                        );
                        self.state = WorkerState::Executing(job);
                    }
                    None => {
                        trace!(worker_id = %self.worker_id, "No job found");
                        self.idle().await;
                        if self.cancel.is_cancelled() {
                            self.state = WorkerState::Stopping;
                        }
                    }
                }
                Ok(())
            }
            WorkerState::Executing(job) => {
                let job = job.clone();
                let (decision, exit_code) = self.execute(&job).await;
                self.state = WorkerState::Releasing {
                    job,
                    decision,
                    exit_code,
                };
                self.finish_release().await
            }
            WorkerState::Releasing { .. } => self.finish_release().await,
            WorkerState::Stopping => {
                info!(worker_id = %self.worker_id, "Worker stopped");
                self.state = WorkerState::Terminated;
                Ok(())
            }
            WorkerState::Terminated => Ok(()),
        }
    }

    /// Steps until the worker terminates. Store errors are logged and retried.
    pub async fn run(&mut self) {
        info!(worker_id = %self.worker_id, "Worker started");

        while !self.is_terminated() {
            if let Err(e) = self.step().await {
                error!(worker_id = %self.worker_id, error = %e, "Worker step failed");
                if matches!(self.state, WorkerState::Releasing { .. }) {
                    // A pending release must not be cut short by the stop signal.
                    tokio::time::sleep(self.idle_interval).await;
                } else {
                    self.idle().await;
                }
            }
        }
    }

    /// Claims and processes at most one job, ignoring the stop signal.
    ///
    /// A release left over from an earlier failed call is finished first.
    /// Returns `None` when no job was eligible.
    pub async fn run_once(&mut self) -> Result<Option<ProcessedJob>, WorkerRuntimeError> {
        if matches!(self.state, WorkerState::Releasing { .. }) {
            self.finish_release().await?;
        }

        let Some(job) = self
            .store
            .claim_next(&self.worker_id)
            .await
            .map_err(WorkerRuntimeError::GetJob)?
        else {
            return Ok(None);
        };

        let (decision, exit_code) = self.execute(&job).await;
        let processed = ProcessedJob {
            job_id: job.id().clone(),
            exit_code,
            decision: decision.clone(),
        };
        self.state = WorkerState::Releasing {
            job,
            decision,
            exit_code,
        };
        self.finish_release().await?;

        Ok(Some(processed))
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.idle_interval) => {}
        }
    }

    /// Runs a claimed job, records its log and decides what happens next.
    #[tracing::instrument(
        name = "run_job",
        skip_all,
        fields(job_id = %job.id(), worker_id = %self.worker_id)
    )]
    async fn execute(&self, job: &Job) -> (RetryDecision, i32) {
        // Re-read for every job so `config set` applies to running workers.
        let settings = match self.store.settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Could not read config, using defaults");
                QueueSettings::default()
            }
        };

        let started_at = Utc::now();
        let start = Instant::now();
        let output = run_command(job.command(), settings.job_timeout()).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        let finished_at = Utc::now();

        debug!(
            exit_code = *output.exit_code(),
            timed_out = *output.timed_out(),
            duration_ms,
            "Command finished"
        );

        let log = NewExecutionLog {
            job_id: job.id().clone(),
            started_at,
            finished_at,
            exit_code: i64::from(*output.exit_code()),
            stdout: output.stdout().clone(),
            stderr: output.stderr().clone(),
        };
        if let Err(e) = self.store.insert_log(&log).await {
            warn!(error = %e, "Failed to write execution log");
        }

        let decision = self
            .policy
            .decide(job, *output.exit_code(), *output.timed_out());
        (decision, *output.exit_code())
    }

    /// Writes the outcome held in `Releasing`, then moves on.
    async fn finish_release(&mut self) -> Result<(), WorkerRuntimeError> {
        let WorkerState::Releasing {
            job,
            decision,
            exit_code,
        } = &self.state
        else {
            return Ok(());
        };

        self.release(job, decision, *exit_code)
            .await
            .map_err(|source| ReleaseJobError {
                job_id: job.id().clone(),
                source,
            })?;

        self.state = if self.cancel.is_cancelled() {
            WorkerState::Stopping
        } else {
            WorkerState::IdlePolling
        };
        Ok(())
    }

    #[tracing::instrument(
        name = "release_job",
        skip_all,
        fields(job_id = %job.id(), worker_id = %self.worker_id)
    )]
    async fn release(
        &self,
        job: &Job,
        decision: &RetryDecision,
        exit_code: i32,
    ) -> Result<(), QueueError> {
        match decision {
            RetryDecision::Complete => {
                if self.store.complete(job.id(), &self.worker_id).await? {
                    info!(command = %job.command(), "Completed job with success");
                } else {
                    warn!("Job lock was lost before completion");
                }
            }
            RetryDecision::Retry {
                attempts,
                delay_secs,
            } => {
                let next_run_at = next_run_at(Utc::now(), *delay_secs);
                let released = self
                    .store
                    .schedule_retry(job.id(), &self.worker_id, *attempts, next_run_at)
                    .await?;

                if released {
                    warn!(
                        exit_code,
                        attempts,
                        max_retries = job.max_retries(),
                        delay_secs,
                        "Failed job, retry scheduled"
                    );
                } else {
                    warn!("Job lock was lost before the retry could be scheduled");
                }
            }
            RetryDecision::Dead { attempts, reason } => {
                debug!(exit_code, attempts, reason = %reason, "Job max retries reached");
                let moved = self
                    .store
                    .dead_letter_locked(job.id(), &self.worker_id, *attempts, reason)
                    .await?;
                if moved.is_none() {
                    warn!("Job lock was lost before it could be dead lettered");
                }
            }
        }

        Ok(())
    }
}
