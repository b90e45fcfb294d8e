//! Durable task queue on top of Postgres row locking.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` so concurrent workers take distinct
//! rows without serializing on each other. Every mutation of a leased row
//! re-verifies `lease_owner`, so a recovered task can never be completed by a
//! stale owner.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{Pool, Postgres};
use tracing::{info, warn};

use crate::entities::{CrawlTask, TaskStatus};
use crate::queue::backoff::retry_backoff;
use crate::queue::error::QueueError;

/// Truncation limit for stored error messages.
const MAX_ERROR_LEN: usize = 2048;

const TASK_COLUMNS: &str = "id, job_id, status, attempts, max_attempts, priority, \
     available_at, leased_until, lease_owner, idempotency_key, last_error, created_at";

/// Outcome of [`TaskQueue::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The task went back to the queue; eligible again after the delay.
    Retry { delay_seconds: i64 },
    /// The retry budget is exhausted; the task is parked permanently.
    DeadLetter,
}

#[derive(Clone)]
pub struct TaskQueue {
    pool: Pool<Postgres>,
}

impl TaskQueue {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Enqueue a task for a crawl job.
    ///
    /// When `idempotency_key` is given and a task with that key already
    /// exists, the existing task id is returned and no row is created.
    pub async fn enqueue(
        &self,
        job_id: i64,
        priority: i32,
        idempotency_key: Option<&str>,
        max_attempts: i32,
    ) -> Result<i64, QueueError> {
        if let Some(key) = idempotency_key
            && let Some(existing) = self.find_by_idempotency_key(key).await?
        {
            info!(key, task_id = existing, "enqueue deduplicated by idempotency key");
            return Ok(existing);
        }

        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO crawl_tasks (job_id, priority, idempotency_key, max_attempts, available_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(priority)
        .bind(idempotency_key)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some((id,)) => {
                info!(task_id = id, job_id, "enqueued crawl task");
                Ok(id)
            }
            // Insert raced with another enqueue holding the same key.
            None => {
                let key = idempotency_key.expect("conflict requires an idempotency key");
                let existing = self
                    .find_by_idempotency_key(key)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?;
                Ok(existing)
            }
        }
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<i64>, QueueError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM crawl_tasks WHERE idempotency_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Atomically claim the next eligible task for `worker_id`.
    ///
    /// Eligible: `status IN (queued, failed)`, `available_at <= now()`, and
    /// retry budget remaining. Ordering is priority first, then how long the
    /// task has been available, then id. The attempt is counted here, at
    /// claim time, so lease recovery never double-counts it.
    pub async fn claim(
        &self,
        worker_id: &str,
        lease_seconds: i64,
    ) -> Result<Option<CrawlTask>, QueueError> {
        let leased_until = Utc::now() + ChronoDuration::seconds(lease_seconds);

        let task = sqlx::query_as::<_, CrawlTask>(&format!(
            r#"
            UPDATE crawl_tasks
            SET status = 'leased',
                lease_owner = $1,
                leased_until = $2,
                attempts = attempts + 1
            WHERE id = (
                SELECT id
                FROM crawl_tasks
                WHERE status IN ('queued', 'failed')
                  AND available_at <= now()
                  AND attempts < max_attempts
                ORDER BY priority DESC, available_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(leased_until)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref task) = task {
            info!(
                task_id = task.id,
                job_id = task.job_id,
                attempt = task.attempts,
                worker_id,
                "claimed crawl task"
            );
        }
        Ok(task)
    }

    /// Extend the lease. Fails with `NotOwner` if the caller lost the lease.
    pub async fn heartbeat(
        &self,
        task_id: i64,
        worker_id: &str,
        extension_seconds: i64,
    ) -> Result<(), QueueError> {
        let leased_until = Utc::now() + ChronoDuration::seconds(extension_seconds);

        let result = sqlx::query(
            r#"
            UPDATE crawl_tasks
            SET leased_until = $3
            WHERE id = $1 AND lease_owner = $2 AND status = 'leased'
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(leased_until)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotOwner {
                task_id,
                worker_id: worker_id.to_string(),
            });
        }
        Ok(())
    }

    /// Transition `leased -> succeeded`, verifying ownership.
    pub async fn complete(&self, task_id: i64, worker_id: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_tasks
            SET status = 'succeeded',
                lease_owner = NULL,
                leased_until = NULL
            WHERE id = $1 AND lease_owner = $2 AND status = 'leased'
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotOwner {
                task_id,
                worker_id: worker_id.to_string(),
            });
        }
        info!(task_id, worker_id, "completed crawl task");
        Ok(())
    }

    /// Record a transient failure: requeue with backoff while attempts remain,
    /// dead-letter otherwise.
    pub async fn fail(
        &self,
        task_id: i64,
        worker_id: &str,
        error: &str,
    ) -> Result<FailOutcome, QueueError> {
        let mut tx = self.pool.begin().await?;

        let task = sqlx::query_as::<_, CrawlTask>(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM crawl_tasks
            WHERE id = $1 AND lease_owner = $2 AND status = 'leased'
            FOR UPDATE
            "#
        ))
        .bind(task_id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| QueueError::NotOwner {
            task_id,
            worker_id: worker_id.to_string(),
        })?;

        let error = truncate_error(error);

        let outcome = if task.attempts >= task.max_attempts {
            sqlx::query(
                r#"
                UPDATE crawl_tasks
                SET status = 'dead_letter',
                    lease_owner = NULL,
                    leased_until = NULL,
                    last_error = $2
                WHERE id = $1
                "#,
            )
            .bind(task_id)
            .bind(&error)
            .execute(&mut *tx)
            .await?;
            FailOutcome::DeadLetter
        } else {
            let delay = retry_backoff(task.attempts);
            let available_at = Utc::now() + ChronoDuration::seconds(delay.as_secs() as i64);
            sqlx::query(
                r#"
                UPDATE crawl_tasks
                SET status = 'queued',
                    lease_owner = NULL,
                    leased_until = NULL,
                    available_at = $2,
                    last_error = $3
                WHERE id = $1
                "#,
            )
            .bind(task_id)
            .bind(available_at)
            .bind(&error)
            .execute(&mut *tx)
            .await?;
            FailOutcome::Retry {
                delay_seconds: delay.as_secs() as i64,
            }
        };

        tx.commit().await?;

        match outcome {
            FailOutcome::Retry { delay_seconds } => {
                warn!(task_id, attempt = task.attempts, delay_seconds, "task failed; retry scheduled");
            }
            FailOutcome::DeadLetter => {
                warn!(task_id, attempts = task.attempts, "task moved to dead letter");
            }
        }
        Ok(outcome)
    }

    /// Park a task permanently, bypassing the retry budget. Used for faults
    /// that cannot succeed on retry (malformed URL, policy violation,
    /// cancellation).
    pub async fn fail_permanent(
        &self,
        task_id: i64,
        worker_id: &str,
        error: &str,
    ) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_tasks
            SET status = 'dead_letter',
                lease_owner = NULL,
                leased_until = NULL,
                last_error = $3
            WHERE id = $1 AND lease_owner = $2 AND status = 'leased'
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(truncate_error(error))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotOwner {
                task_id,
                worker_id: worker_id.to_string(),
            });
        }
        warn!(task_id, "task dead-lettered for permanent fault");
        Ok(())
    }

    /// Return expired leases to the queue without charging another attempt
    /// (the attempt was counted at claim time). Returns how many rows moved.
    pub async fn recover(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_tasks
            SET status = 'queued',
                lease_owner = NULL,
                leased_until = NULL,
                available_at = now(),
                last_error = 'lease expired before completion; recovered'
            WHERE status = 'leased' AND leased_until < now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!(recovered, "recovered expired task leases");
        }
        Ok(recovered)
    }

    /// Fetch a task by id.
    pub async fn find_by_id(&self, task_id: i64) -> Result<Option<CrawlTask>, QueueError> {
        let task = sqlx::query_as::<_, CrawlTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM crawl_tasks WHERE id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    /// Current status of a task, if it still exists.
    pub async fn status(&self, task_id: i64) -> Result<Option<TaskStatus>, QueueError> {
        let row: Option<(TaskStatus,)> =
            sqlx::query_as("SELECT status FROM crawl_tasks WHERE id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(s,)| s))
    }
}

fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LEN {
        error.to_string()
    } else {
        let mut cut = MAX_ERROR_LEN;
        while !error.is_char_boundary(cut) {
            cut -= 1;
        }
        error[..cut].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_error_preserves_short_messages() {
        assert_eq!(truncate_error("boom"), "boom");
    }

    #[test]
    fn truncate_error_cuts_on_char_boundary() {
        let long = "é".repeat(2000);
        let truncated = truncate_error(&long);
        assert!(truncated.len() <= MAX_ERROR_LEN);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
