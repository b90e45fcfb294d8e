use chrono::Utc;
use sqlx::{Pool, Postgres};

use llmstxt::entities::TaskStatus;
use llmstxt::queue::{FailOutcome, QueueError, TaskQueue};
use llmstxt::repositories::{CrawlJobRepository, SiteRepository};

/// Tasks reference a crawl job, which references a site.
async fn seed_job(pool: &Pool<Postgres>) -> i64 {
    let site = SiteRepository::new(pool.clone())
        .upsert("https://example.com/", "example.com")
        .await
        .expect("failed to create site");
    let job = CrawlJobRepository::new(pool.clone())
        .create(site.id, 200, 3)
        .await
        .expect("failed to create job");
    job.id
}

/// Make a task immediately claimable regardless of its retry backoff.
async fn make_available(pool: &Pool<Postgres>, task_id: i64) {
    sqlx::query("UPDATE crawl_tasks SET available_at = now() WHERE id = $1")
        .bind(task_id)
        .execute(pool)
        .await
        .expect("failed to reset available_at");
}

#[sqlx::test]
async fn enqueue_and_claim(pool: Pool<Postgres>) {
    let queue = TaskQueue::new(pool.clone());
    let job_id = seed_job(&pool).await;

    let task_id = queue.enqueue(job_id, 0, None, 5).await.expect("enqueue");

    let task = queue
        .claim("worker-a", 60)
        .await
        .expect("claim")
        .expect("a task should be eligible");

    assert_eq!(task.id, task_id);
    assert_eq!(task.job_id, job_id);
    assert_eq!(task.status, TaskStatus::Leased);
    assert_eq!(task.attempts, 1);
    assert_eq!(task.lease_owner.as_deref(), Some("worker-a"));
    assert!(task.leased_until.expect("leased_until set") > Utc::now());

    // Nothing else is eligible while the lease holds.
    assert!(queue.claim("worker-b", 60).await.expect("claim").is_none());
}

#[sqlx::test]
async fn enqueue_with_same_idempotency_key_returns_existing(pool: Pool<Postgres>) {
    let queue = TaskQueue::new(pool.clone());
    let job_id = seed_job(&pool).await;

    let first = queue
        .enqueue(job_id, 0, Some("cron-1-2026-08-02T00:00:00+00:00"), 5)
        .await
        .expect("first enqueue");
    let second = queue
        .enqueue(job_id, 0, Some("cron-1-2026-08-02T00:00:00+00:00"), 5)
        .await
        .expect("second enqueue");

    assert_eq!(first, second);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM crawl_tasks")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(count, 1);
}

#[sqlx::test]
async fn complete_rejects_non_owner(pool: Pool<Postgres>) {
    let queue = TaskQueue::new(pool.clone());
    let job_id = seed_job(&pool).await;
    queue.enqueue(job_id, 0, None, 5).await.expect("enqueue");

    let task = queue.claim("worker-a", 60).await.expect("claim").unwrap();

    let err = queue.complete(task.id, "worker-b").await.unwrap_err();
    assert!(matches!(err, QueueError::NotOwner { .. }));
    // The rejected call had no side effect.
    assert_eq!(
        queue.status(task.id).await.expect("status"),
        Some(TaskStatus::Leased)
    );

    queue.complete(task.id, "worker-a").await.expect("complete");
    assert_eq!(
        queue.status(task.id).await.expect("status"),
        Some(TaskStatus::Succeeded)
    );
}

#[sqlx::test]
async fn heartbeat_extends_lease_for_owner_only(pool: Pool<Postgres>) {
    let queue = TaskQueue::new(pool.clone());
    let job_id = seed_job(&pool).await;
    queue.enqueue(job_id, 0, None, 5).await.expect("enqueue");

    let task = queue.claim("worker-a", 1).await.expect("claim").unwrap();
    let initial = task.leased_until.unwrap();

    queue
        .heartbeat(task.id, "worker-a", 120)
        .await
        .expect("heartbeat");
    let extended = queue
        .find_by_id(task.id)
        .await
        .expect("find")
        .unwrap()
        .leased_until
        .unwrap();
    assert!(extended > initial);

    let err = queue.heartbeat(task.id, "worker-b", 120).await.unwrap_err();
    assert!(matches!(err, QueueError::NotOwner { .. }));
}

#[sqlx::test]
async fn fail_requeues_with_backoff(pool: Pool<Postgres>) {
    let queue = TaskQueue::new(pool.clone());
    let job_id = seed_job(&pool).await;
    queue.enqueue(job_id, 0, None, 5).await.expect("enqueue");

    let task = queue.claim("worker-a", 60).await.expect("claim").unwrap();
    let outcome = queue
        .fail(task.id, "worker-a", "connection reset")
        .await
        .expect("fail");

    match outcome {
        FailOutcome::Retry { delay_seconds } => assert!(delay_seconds >= 15),
        FailOutcome::DeadLetter => panic!("first failure must schedule a retry"),
    }

    let failed = queue.find_by_id(task.id).await.expect("find").unwrap();
    assert_eq!(failed.status, TaskStatus::Queued);
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.last_error.as_deref(), Some("connection reset"));
    assert!(failed.available_at > Utc::now());
    assert!(failed.lease_owner.is_none());

    // Not claimable until the backoff elapses.
    assert!(queue.claim("worker-a", 60).await.expect("claim").is_none());
}

#[sqlx::test]
async fn task_dead_letters_after_max_attempts(pool: Pool<Postgres>) {
    let queue = TaskQueue::new(pool.clone());
    let job_id = seed_job(&pool).await;
    let task_id = queue.enqueue(job_id, 0, None, 3).await.expect("enqueue");

    for attempt in 1..=3 {
        let task = queue
            .claim("worker-a", 60)
            .await
            .expect("claim")
            .unwrap_or_else(|| panic!("attempt {attempt} should be claimable"));
        assert_eq!(task.attempts, attempt);

        let outcome = queue
            .fail(task.id, "worker-a", "permanent-ish trouble")
            .await
            .expect("fail");
        if attempt < 3 {
            assert!(matches!(outcome, FailOutcome::Retry { .. }));
            make_available(&pool, task_id).await;
        } else {
            assert_eq!(outcome, FailOutcome::DeadLetter);
        }
    }

    assert_eq!(
        queue.status(task_id).await.expect("status"),
        Some(TaskStatus::DeadLetter)
    );
    // No fourth attempt: dead-lettered tasks are not eligible.
    make_available(&pool, task_id).await;
    assert!(queue.claim("worker-a", 60).await.expect("claim").is_none());
}

#[sqlx::test]
async fn recover_returns_expired_lease_without_charging_an_attempt(pool: Pool<Postgres>) {
    let queue = TaskQueue::new(pool.clone());
    let job_id = seed_job(&pool).await;
    let task_id = queue.enqueue(job_id, 0, None, 5).await.expect("enqueue");

    // Worker A claims with a zero-length lease and dies.
    let task = queue.claim("worker-a", 0).await.expect("claim").unwrap();
    assert_eq!(task.attempts, 1);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let recovered = queue.recover().await.expect("recover");
    assert_eq!(recovered, 1);

    let requeued = queue.find_by_id(task_id).await.expect("find").unwrap();
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert_eq!(requeued.attempts, 1, "recovery must not double-count");
    assert!(requeued.lease_owner.is_none());
    assert!(requeued.last_error.unwrap().contains("recovered"));

    // No task remains leased past its expiry.
    let (stale,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM crawl_tasks WHERE status = 'leased' AND leased_until < now()",
    )
    .fetch_one(&pool)
    .await
    .expect("count");
    assert_eq!(stale, 0);

    // Worker B picks it up and finishes: attempts = 2 total.
    let task = queue.claim("worker-b", 60).await.expect("claim").unwrap();
    assert_eq!(task.attempts, 2);
    queue.complete(task.id, "worker-b").await.expect("complete");
    assert_eq!(
        queue.status(task_id).await.expect("status"),
        Some(TaskStatus::Succeeded)
    );
}

#[sqlx::test]
async fn concurrent_workers_claim_distinct_tasks(pool: Pool<Postgres>) {
    let queue = TaskQueue::new(pool.clone());
    let job_id = seed_job(&pool).await;
    for _ in 0..3 {
        queue.enqueue(job_id, 0, None, 5).await.expect("enqueue");
    }

    let (a, b, c) = tokio::join!(
        queue.claim("worker-a", 60),
        queue.claim("worker-b", 60),
        queue.claim("worker-c", 60),
    );
    let ids = [
        a.expect("claim a").expect("task for a").id,
        b.expect("claim b").expect("task for b").id,
        c.expect("claim c").expect("task for c").id,
    ];

    let mut unique = ids.to_vec();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 3, "workers must claim distinct tasks");
}

#[sqlx::test]
async fn claim_order_is_priority_then_age(pool: Pool<Postgres>) {
    let queue = TaskQueue::new(pool.clone());
    let job_id = seed_job(&pool).await;

    let low_first = queue.enqueue(job_id, 0, None, 5).await.expect("enqueue");
    let low_second = queue.enqueue(job_id, 0, None, 5).await.expect("enqueue");
    let high = queue.enqueue(job_id, 10, None, 5).await.expect("enqueue");

    let first = queue.claim("w", 60).await.expect("claim").unwrap();
    let second = queue.claim("w", 60).await.expect("claim").unwrap();
    let third = queue.claim("w", 60).await.expect("claim").unwrap();

    assert_eq!(first.id, high, "higher priority claims first");
    assert_eq!(second.id, low_first, "then oldest at equal priority");
    assert_eq!(third.id, low_second);
}

#[sqlx::test]
async fn fail_permanent_bypasses_retries(pool: Pool<Postgres>) {
    let queue = TaskQueue::new(pool.clone());
    let job_id = seed_job(&pool).await;
    let task_id = queue.enqueue(job_id, 0, None, 5).await.expect("enqueue");

    let task = queue.claim("worker-a", 60).await.expect("claim").unwrap();
    queue
        .fail_permanent(task.id, "worker-a", "cancelled: site deleted")
        .await
        .expect("fail_permanent");

    assert_eq!(
        queue.status(task_id).await.expect("status"),
        Some(TaskStatus::DeadLetter)
    );
    make_available(&pool, task_id).await;
    assert!(queue.claim("worker-a", 60).await.expect("claim").is_none());
}
