use std::collections::HashSet;
use std::time::Duration;

use queuectl::{JobState, WorkerPool};
use serde_json::json;
use tokio_util::sync::CancellationToken;

mod helpers;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_drains_the_queue() {
    helpers::with_test_db(|test_db| async move {
        for i in 0..6 {
            test_db
                .add_job(json!({ "id": format!("job{i}"), "command": "true" }))
                .await;
        }

        let pool = WorkerPool::start(test_db.store().clone(), 3, helpers::TEST_IDLE_INTERVAL);
        assert_eq!(pool.len(), 3);
        let ids: HashSet<_> = pool.worker_ids().into_iter().collect();
        assert_eq!(ids.len(), 3);

        let jobs = test_db
            .wait_for_jobs(Duration::from_secs(10), |jobs| {
                jobs.iter().all(|job| *job.state() == JobState::Completed)
            })
            .await;
        assert_eq!(jobs.len(), 6);

        let stopped = tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("pool did not stop");
        assert_eq!(stopped, 3);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stopping_the_pool_waits_for_running_jobs() {
    helpers::with_test_db(|test_db| async move {
        test_db
            .add_job(json!({ "id": "slow", "command": "sleep 0.5" }))
            .await;

        let cancel = CancellationToken::new();
        let pool = test_db.queue.start_pool(2, cancel.clone());

        test_db
            .wait_for_jobs(Duration::from_secs(5), |jobs| {
                jobs.iter().all(|job| *job.state() == JobState::Processing)
            })
            .await;

        cancel.cancel();
        pool.join().await;

        // The claimed job was released before its worker exited.
        assert_eq!(*test_db.get_job("slow").await.state(), JobState::Completed);
    })
    .await;
}

#[tokio::test]
async fn pool_with_no_workers_is_empty() {
    helpers::with_test_db(|test_db| async move {
        let pool = WorkerPool::start(test_db.store().clone(), 0, helpers::TEST_IDLE_INTERVAL);
        assert!(pool.is_empty());
        assert_eq!(pool.shutdown().await, 0);
    })
    .await;
}
