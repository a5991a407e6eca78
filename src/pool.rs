use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::runner::WorkerLoop;
use crate::store::Store;

/// A set of workers running as tasks of the current process.
///
/// All workers share one cancellation token, so stopping the pool is a single
/// broadcast. Each worker finishes the job it holds before exiting.
pub struct WorkerPool {
    cancel: CancellationToken,
    workers: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    /// Spawns `concurrency` workers polling `store`.
    pub fn start(store: Store, concurrency: usize, idle_interval: Duration) -> Self {
        Self::start_with_token(store, concurrency, idle_interval, CancellationToken::new())
    }

    /// Like [`WorkerPool::start`], stopping when `cancel` is cancelled.
    pub fn start_with_token(
        store: Store,
        concurrency: usize,
        idle_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let workers = (0..concurrency)
            .map(|_| {
                let mut worker = WorkerLoop::new(store.clone(), cancel.clone())
                    .with_idle_interval(idle_interval);
                let worker_id = worker.worker_id().clone();
                let handle = tokio::spawn(async move { worker.run().await });
                (worker_id, handle)
            })
            .collect();

        info!(concurrency, "Worker pool started");
        WorkerPool { cancel, workers }
    }

    pub fn worker_ids(&self) -> Vec<&str> {
        self.workers.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signals every worker to stop and returns how many were still running.
    ///
    /// Does not wait for them; see [`WorkerPool::join`].
    pub fn stop(&self) -> usize {
        let running = self
            .workers
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count();
        self.cancel.cancel();
        info!(running, "Worker pool stop requested");
        running
    }

    /// Waits for every worker to terminate.
    pub async fn join(self) {
        for (worker_id, handle) in self.workers {
            if let Err(e) = handle.await {
                error!(worker_id = %worker_id, error = %e, "Worker task failed");
            }
        }
        info!("Worker pool stopped");
    }

    /// Stops the pool and waits for it. Returns the number of workers signalled.
    pub async fn shutdown(self) -> usize {
        let signalled = self.stop();
        self.join().await;
        signalled
    }
}
