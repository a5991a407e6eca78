#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use queuectl::{DlqEntry, ExecutionLog, Job, JobSpec, Queue, QueueOptions, Store, WorkerLoop};
use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::OnceCell;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const TEST_IDLE_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
pub struct TestDatabase {
    pub queue: Queue,
    pub database_url: String,
    pub dir: Arc<TempDir>,
}

impl TestDatabase {
    pub fn store(&self) -> &Store {
        self.queue.store()
    }

    pub fn pool(&self) -> &SqlitePool {
        self.queue.store().pool()
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.path().join("workers.json")
    }

    /// A second, independent queue on the same database file, as another
    /// process would open it.
    pub async fn reopen(&self) -> Queue {
        QueueOptions::default()
            .database_url(self.database_url.clone())
            .state_file(self.state_file())
            .idle_interval(TEST_IDLE_INTERVAL)
            .init()
            .await
            .expect("Failed to reopen test database")
    }

    pub fn worker(&self, worker_id: &str) -> WorkerLoop {
        self.queue
            .worker(CancellationToken::new())
            .with_worker_id(worker_id)
    }

    pub async fn add_job(&self, payload: Value) -> Job {
        let spec: JobSpec = serde_json::from_value(payload).expect("Invalid job payload");
        self.queue
            .enqueue_spec(spec)
            .await
            .expect("Failed to add job")
    }

    pub async fn get_jobs(&self) -> Vec<Job> {
        sqlx::query_as("select * from jobs order by created_at asc, rowid asc")
            .fetch_all(self.pool())
            .await
            .expect("Failed to get jobs")
    }

    pub async fn get_job(&self, job_id: &str) -> Job {
        self.queue
            .get_job(job_id)
            .await
            .expect("Failed to get job")
            .unwrap_or_else(|| panic!("Job '{job_id}' does not exist"))
    }

    pub async fn get_dlq(&self) -> Vec<DlqEntry> {
        sqlx::query_as("select * from dlq order by id asc")
            .fetch_all(self.pool())
            .await
            .expect("Failed to get dead letter queue")
    }

    pub async fn get_logs(&self, job_id: &str) -> Vec<ExecutionLog> {
        self.queue.logs(job_id).await.expect("Failed to get logs")
    }

    /// Clears every scheduling constraint on pending jobs.
    pub async fn make_jobs_run_now(&self) {
        sqlx::query(
            r#"
                update jobs
                    set run_at = null, next_run_at = null
                    where state = 'pending'
            "#,
        )
        .execute(self.pool())
        .await
        .expect("Failed to update jobs");
    }

    pub async fn set_config(&self, key: &str, value: &str) {
        self.queue
            .config_set(key, value)
            .await
            .expect("Failed to set config");
    }

    /// Polls until `predicate` holds for the job list or the deadline passes.
    pub async fn wait_for_jobs<P>(&self, timeout: Duration, predicate: P) -> Vec<Job>
    where
        P: Fn(&[Job]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let jobs = self.get_jobs().await;
            if predicate(&jobs) {
                return jobs;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("Timed out waiting for jobs, last seen: {jobs:#?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub async fn create_test_database() -> TestDatabase {
    let dir = tempfile::tempdir().expect("Failed to create temporary directory");
    let database_url = format!("sqlite:{}", dir.path().join("queue.db").display());

    let queue = QueueOptions::default()
        .database_url(database_url.clone())
        .state_file(dir.path().join("workers.json"))
        .idle_interval(TEST_IDLE_INTERVAL)
        .init()
        .await
        .expect("Failed to open test database");

    TestDatabase {
        queue,
        database_url,
        dir: Arc::new(dir),
    }
}

pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + 'static,
    Fut: std::future::Future<Output = ()>,
{
    let local_set = LocalSet::new();

    local_set
        .run_until(async move {
            let test_db = create_test_database().await;
            let test_db_2 = test_db.clone();

            let result = tokio::task::spawn_local(async move {
                test_fn(test_db_2).await;
            })
            .await;

            test_db.pool().close().await;
            result.expect("Test failed");
        })
        .await;
}

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer();
        // Log level set to debug except for sqlx set at warn (to not show all sql requests)
        let filter_layer = EnvFilter::try_new("debug,sqlx=warn").unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}
