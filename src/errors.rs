use std::path::PathBuf;

use queuectl_migrations::MigrateError;
use thiserror::Error;

/// Errors that can occur during queue operations.
///
/// A job whose command exits non-zero or times out is *not* an error: that is
/// ordinary outcome data carried by [`crate::executor::CommandOutput`] and it
/// drives the retry / dead letter decision instead.
#[derive(Error, Debug)]
pub enum QueueError {
    /// An error occurred while executing an SQL query
    #[error("Error occured while query: {0}")]
    SqlError(#[from] sqlx::Error),

    /// A job payload was not valid JSON
    #[error("Invalid JSON payload: {0}")]
    ParseError(#[from] serde_json::Error),

    /// A job or config value was rejected before reaching the store
    #[error("{0}")]
    ValidationError(String),

    /// A job with the same id already exists
    #[error("Job '{0}' already exists")]
    DuplicateId(String),

    /// The job to move to the dead letter queue is missing or already dead
    #[error("Job '{0}' is already dead or does not exist")]
    AlreadyDead(String),

    /// No dead letter record exists for the job
    #[error("Job '{0}' not found in dead letter queue")]
    NotFound(String),

    /// Applying the schema failed
    #[error("Error occured while migrating the database schema: {0}")]
    MigrationError(#[from] MigrateError),

    /// The worker pool state file exists but is not a valid pool record
    #[error("Worker state file '{}' is corrupt: {source}", .path.display())]
    StateFileError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Reading or writing the worker pool state file, or spawning a worker
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A Result type alias for QueueError.
pub type Result<T> = core::result::Result<T, QueueError>;

impl QueueError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        QueueError::ValidationError(message.into())
    }
}
