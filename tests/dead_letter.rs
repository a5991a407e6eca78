use queuectl::{JobState, QueueError};
use serde_json::json;

mod helpers;

#[tokio::test]
async fn move_to_dead_then_requeue() {
    helpers::with_test_db(|test_db| async move {
        test_db
            .add_job(json!({ "id": "doomed", "command": "exit 3", "max_retries": 4 }))
            .await;

        let store = test_db.store();
        store.claim_next("worker").await.unwrap().unwrap();

        let entry = store.move_to_dead("doomed", 4, "exit 3").await.unwrap();
        assert_eq!(entry.id(), "doomed");
        assert_eq!(entry.command(), "exit 3");
        assert_eq!(*entry.attempts(), 4);
        assert_eq!(*entry.max_retries(), 4);
        assert_eq!(entry.reason(), "exit 3");

        let job = test_db.get_job("doomed").await;
        assert_eq!(*job.state(), JobState::Dead);
        assert_eq!(*job.attempts(), 4);
        assert_eq!(job.locked_by(), &None);
        assert_eq!(test_db.queue.dlq_list().await.unwrap(), vec![entry]);

        let requeued = store.requeue_from_dlq("doomed").await.unwrap();
        assert_eq!(*requeued.state(), JobState::Pending);
        assert_eq!(*requeued.attempts(), 0);
        assert_eq!(requeued.next_run_at(), &None);
        assert_eq!(requeued.locked_by(), &None);
        assert!(test_db.get_dlq().await.is_empty());

        let claimed = store.claim_next("worker").await.unwrap();
        assert_eq!(claimed.map(|job| job.id().clone()).as_deref(), Some("doomed"));
    })
    .await;
}

#[tokio::test]
async fn second_requeue_reports_not_found() {
    helpers::with_test_db(|test_db| async move {
        test_db.add_job(json!({ "id": "doomed", "command": "false" })).await;

        let store = test_db.store();
        store.move_to_dead("doomed", 3, "exit 1").await.unwrap();

        assert!(test_db.queue.dlq_retry("doomed").await.unwrap());
        assert!(!test_db.queue.dlq_retry("doomed").await.unwrap());
        assert!(matches!(
            store.requeue_from_dlq("doomed").await,
            Err(QueueError::NotFound(id)) if id == "doomed"
        ));

        let job = test_db.get_job("doomed").await;
        assert_eq!(*job.state(), JobState::Pending);
        assert_eq!(*job.attempts(), 0);
    })
    .await;
}

#[tokio::test]
async fn dead_job_cannot_die_twice() {
    helpers::with_test_db(|test_db| async move {
        test_db.add_job(json!({ "id": "doomed", "command": "false" })).await;

        let store = test_db.store();
        store.move_to_dead("doomed", 3, "exit 1").await.unwrap();

        assert!(matches!(
            store.move_to_dead("doomed", 3, "exit 1").await,
            Err(QueueError::AlreadyDead(_))
        ));
        assert!(matches!(
            store.move_to_dead("missing", 1, "exit 1").await,
            Err(QueueError::AlreadyDead(_))
        ));
        assert_eq!(test_db.get_dlq().await.len(), 1);
    })
    .await;
}

#[tokio::test]
async fn requeue_of_unknown_job_is_not_found() {
    helpers::with_test_db(|test_db| async move {
        test_db.add_job(json!({ "id": "alive", "command": "true" })).await;

        assert!(!test_db.queue.dlq_retry("alive").await.unwrap());
        assert!(!test_db.queue.dlq_retry("ghost").await.unwrap());
        assert_eq!(*test_db.get_job("alive").await.state(), JobState::Pending);
    })
    .await;
}

#[tokio::test]
async fn dead_jobs_and_dlq_records_match() {
    helpers::with_test_db(|test_db| async move {
        for (id, max_retries) in [("a", 1), ("b", 1), ("c", 2)] {
            test_db
                .add_job(json!({ "id": id, "command": "false", "max_retries": max_retries }))
                .await;
        }

        let mut worker = test_db.worker("worker");
        while worker.run_once().await.unwrap().is_some() {
            test_db.make_jobs_run_now().await;
        }

        let dead: Vec<_> = test_db
            .get_jobs()
            .await
            .into_iter()
            .filter(|job| *job.state() == JobState::Dead)
            .map(|job| job.id().clone())
            .collect();
        let mut recorded: Vec<_> = test_db
            .get_dlq()
            .await
            .into_iter()
            .map(|entry| entry.id().clone())
            .collect();
        recorded.sort();

        assert_eq!(dead, vec!["a", "b", "c"]);
        assert_eq!(recorded, dead);

        let summary = test_db.queue.summary().await.unwrap();
        assert_eq!(summary.count(JobState::Dead), 3);
        assert_eq!(summary.dlq, 3);
    })
    .await;
}

#[tokio::test]
async fn failed_dlq_write_leaves_the_job_alive() {
    helpers::with_test_db(|test_db| async move {
        test_db.add_job(json!({ "id": "doomed", "command": "false" })).await;

        let store = test_db.store();
        store.claim_next("worker").await.unwrap().unwrap();

        sqlx::query(
            r#"
                create trigger reject_dlq before insert on dlq
                begin
                    select raise(abort, 'dead letter queue unavailable');
                end;
            "#,
        )
        .execute(test_db.pool())
        .await
        .unwrap();

        assert!(matches!(
            store.dead_letter_locked("doomed", "worker", 3, "exit 1").await,
            Err(QueueError::SqlError(_))
        ));
        assert!(matches!(
            store.move_to_dead("doomed", 3, "exit 1").await,
            Err(QueueError::SqlError(_))
        ));

        let job = test_db.get_job("doomed").await;
        assert_eq!(*job.state(), JobState::Processing);
        assert_eq!(*job.attempts(), 0);
        assert_eq!(job.locked_by().as_deref(), Some("worker"));
        assert!(test_db.get_dlq().await.is_empty());

        sqlx::query("drop trigger reject_dlq")
            .execute(test_db.pool())
            .await
            .unwrap();

        let entry = store
            .dead_letter_locked("doomed", "worker", 3, "exit 1")
            .await
            .unwrap()
            .expect("job should still be held by the worker");
        assert_eq!(*entry.attempts(), 3);
        assert_eq!(*test_db.get_job("doomed").await.state(), JobState::Dead);
        assert_eq!(test_db.get_dlq().await.len(), 1);
    })
    .await;
}
