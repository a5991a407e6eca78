//! A persistent background job queue backed by SQLite.
//!
//! Clients enqueue shell commands as jobs. Workers claim them atomically, run
//! them with a time limit, retry failures with exponential backoff and move
//! jobs that exhaust their retries to a dead letter queue.
//!
//! ```no_run
//! use queuectl::{JobFilter, QueueOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = QueueOptions::default()
//!     .database_url("sqlite:queue.db")
//!     .init()
//!     .await?;
//!
//! queue.enqueue(r#"{"command":"echo hello","max_retries":2}"#).await?;
//!
//! let pool = queue.start_pool(2, CancellationToken::new());
//! // ... later
//! pool.shutdown().await;
//!
//! let done = queue.list_jobs(JobFilter::All).await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod builder;
pub mod config;
pub mod errors;
pub mod executor;
pub mod job_spec;
pub mod pool;
pub mod queue;
pub mod runner;
mod sql;
pub mod store;
pub mod supervisor;

pub use crate::backoff::{delay_seconds, RetryDecision, RetryPolicy};
pub use crate::builder::{QueueBuildError, QueueOptions};
pub use crate::config::{normalize_key, QueueSettings};
pub use crate::errors::{QueueError, Result};
pub use crate::executor::{run_command, CommandOutput};
pub use crate::job_spec::{JobSpec, JobSpecBuilder};
pub use crate::pool::WorkerPool;
pub use crate::queue::Queue;
pub use crate::runner::{ProcessedJob, WorkerLoop, WorkerRuntimeError, WorkerState};
pub use crate::store::Store;
pub use crate::supervisor::{PoolState, ProcessSupervisor};
pub use queuectl_job::{
    DlqEntry, ExecutionLog, Job, JobFilter, JobState, NewExecutionLog, QueueSummary,
};
pub use queuectl_migrations::MigrateError;
