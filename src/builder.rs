use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use queuectl_migrations::MigrateError;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::debug;

use crate::queue::Queue;
use crate::runner::DEFAULT_IDLE_INTERVAL;
use crate::store::Store;

/// Environment variable holding the database URL.
pub const DATABASE_URL_ENV: &str = "QUEUECTL_DB";
/// Environment variable holding the worker pool state file path.
pub const STATE_FILE_ENV: &str = "QUEUECTL_PIDS";

pub const DEFAULT_DATABASE_URL: &str = "sqlite:queue.db";
pub const DEFAULT_STATE_FILE: &str = "workers.json";
const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for opening a [`Queue`].
///
/// Unset values fall back to the `QUEUECTL_DB` / `QUEUECTL_PIDS` environment
/// variables, then to built in defaults.
///
/// ```no_run
/// use queuectl::QueueOptions;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = QueueOptions::default()
///     .database_url("sqlite:/var/lib/queuectl/queue.db")
///     .max_connections(8)
///     .init()
///     .await?;
///
/// let id = queue.enqueue(r#"{"command":"echo hello"}"#).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct QueueOptions {
    /// SQLite connection string, e.g. `sqlite:queue.db`
    database_url: Option<String>,

    /// An existing pool, used instead of `database_url`
    sqlite_pool: Option<SqlitePool>,

    /// Maximum number of connections in the pool
    max_connections: Option<u32>,

    /// How long a connection waits for a write lock held by another process
    busy_timeout: Option<Duration>,

    /// How long an idle worker sleeps between polls
    idle_interval: Option<Duration>,

    /// Where worker process ids are recorded
    state_file: Option<PathBuf>,
}

/// Errors that can occur when opening a queue.
#[derive(Error, Debug)]
pub enum QueueBuildError {
    /// The database URL could not be parsed
    #[error("Invalid database url '{url}': {source}")]
    InvalidDatabaseUrl {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    /// Failed to connect to the SQLite database
    #[error("Error occurred while connecting to the SQLite database: {0}")]
    ConnectError(#[from] sqlx::Error),

    /// Failed to apply database migrations
    #[error("Error occurred while migrating the database schema: {0}")]
    MigrationError(#[from] MigrateError),
}

impl QueueOptions {
    pub fn database_url(mut self, value: impl Into<String>) -> Self {
        self.database_url = Some(value.into());
        self
    }

    pub fn sqlite_pool(mut self, value: SqlitePool) -> Self {
        self.sqlite_pool = Some(value);
        self
    }

    pub fn max_connections(mut self, value: u32) -> Self {
        self.max_connections = Some(value);
        self
    }

    pub fn busy_timeout(mut self, value: Duration) -> Self {
        self.busy_timeout = Some(value);
        self
    }

    pub fn idle_interval(mut self, value: Duration) -> Self {
        self.idle_interval = Some(value);
        self
    }

    pub fn state_file(mut self, value: impl Into<PathBuf>) -> Self {
        self.state_file = Some(value.into());
        self
    }

    /// Opens the database, applies migrations and returns the queue.
    ///
    /// Migrating is idempotent, so every process may call this at start.
    pub async fn init(self) -> Result<Queue, QueueBuildError> {
        // An injected pool only forwards an explicitly configured URL.
        let database_url = match &self.sqlite_pool {
            Some(_) => self.database_url,
            None => self
                .database_url
                .or_else(|| std::env::var(DATABASE_URL_ENV).ok())
                .filter(|url| !url.trim().is_empty()),
        };

        let pool = match self.sqlite_pool {
            Some(pool) => pool,
            None => {
                let url = database_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
                let options = SqliteConnectOptions::from_str(&url)
                    .map_err(|source| QueueBuildError::InvalidDatabaseUrl {
                        url: url.clone(),
                        source,
                    })?
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .busy_timeout(self.busy_timeout.unwrap_or(DEFAULT_BUSY_TIMEOUT));

                debug!(url = %url, "Connecting to SQLite database");
                SqlitePoolOptions::new()
                    .max_connections(self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
                    .connect_with(options)
                    .await?
            }
        };

        queuectl_migrations::migrate(&pool).await?;

        let state_file = self
            .state_file
            .or_else(|| std::env::var_os(STATE_FILE_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));

        Ok(Queue::new(
            Store::new(pool),
            self.idle_interval.unwrap_or(DEFAULT_IDLE_INTERVAL),
            state_file,
            database_url,
        ))
    }
}
