//! Worker runtime: claim loop, lease heartbeat, recovery.
//!
//! One worker process runs one crawl at a time (crawls are concurrent
//! internally). Each poll tick first returns expired leases to the queue,
//! then tries to claim. A heartbeat task renews the lease while the crawl
//! runs and is cancelled deterministically on both completion paths.

pub mod run_crawl;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::{Pool, Postgres};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::assembler::{self, Assembler};
use crate::config::Config;
use crate::entities::CrawlTask;
use crate::queue::{FailOutcome, QueueError, TaskQueue};
use crate::repositories::CrawlJobRepository;
use crate::scheduler;

pub use run_crawl::{TaskError, run_crawl_task};

pub struct WorkerRuntime {
    pool: Pool<Postgres>,
    queue: TaskQueue,
    config: Arc<Config>,
    assembler: Arc<dyn Assembler>,
    shutdown: CancellationToken,
}

impl WorkerRuntime {
    pub fn new(pool: Pool<Postgres>, config: Config) -> Self {
        let assembler = assembler::from_config(&config);
        Self {
            queue: TaskQueue::new(pool.clone()),
            pool,
            config: Arc::new(config),
            assembler,
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn run(self) -> Result<()> {
        info!(worker_id = %self.config.worker_id, "starting worker");

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {e}");
                return;
            }
            info!("received shutdown signal, finishing current task...");
            shutdown.cancel();
        });

        let scheduler_handle = if self.config.run_scheduler {
            Some(tokio::spawn(scheduler::run(
                self.pool.clone(),
                self.queue.clone(),
                self.config.clone(),
                self.shutdown.clone(),
            )))
        } else {
            None
        };

        let mut poll =
            tokio::time::interval(Duration::from_millis(self.config.task_poll_interval_ms));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = poll.tick() => {
                    if let Err(e) = self.queue.recover().await {
                        error!("lease recovery failed: {e}");
                        continue;
                    }
                    match self.queue.claim(&self.config.worker_id, self.config.task_lease_seconds).await {
                        Ok(Some(task)) => self.process_task(task).await,
                        Ok(None) => {}
                        Err(e) => error!("claim failed: {e}"),
                    }
                }
            }
        }

        if let Some(handle) = scheduler_handle {
            let _ = handle.await;
        }
        info!("worker shut down");
        Ok(())
    }

    async fn process_task(&self, task: CrawlTask) {
        let heartbeat_stop = CancellationToken::new();
        let crawl_cancel = self.shutdown.child_token();

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.queue.clone(),
            task.id,
            self.config.worker_id.clone(),
            self.config.task_heartbeat_interval_seconds,
            self.config.task_lease_seconds,
            heartbeat_stop.clone(),
            crawl_cancel.clone(),
        ));

        let result = run_crawl_task(
            &self.pool,
            &self.config,
            &self.assembler,
            &task,
            crawl_cancel,
        )
        .await;

        // Stop the heartbeat before touching the task row again.
        heartbeat_stop.cancel();
        let _ = heartbeat.await;

        let worker_id = &self.config.worker_id;
        match result {
            Ok(()) => match self.queue.complete(task.id, worker_id).await {
                Ok(()) => {}
                Err(QueueError::NotOwner { .. }) => {
                    warn!(task_id = task.id, "lease lost before completion; abandoning task");
                }
                Err(e) => error!(task_id = task.id, "failed to complete task: {e}"),
            },
            Err(TaskError::Permanent(message)) => {
                warn!(task_id = task.id, %message, "permanent task failure");
                match self.queue.fail_permanent(task.id, worker_id, &message).await {
                    Ok(()) | Err(QueueError::NotOwner { .. }) => {}
                    Err(e) => error!(task_id = task.id, "failed to dead-letter task: {e}"),
                }
                self.mark_job_failed(task.job_id, &message).await;
            }
            Err(TaskError::Transient(message)) => {
                warn!(task_id = task.id, %message, "transient task failure");
                match self.queue.fail(task.id, worker_id, &message).await {
                    Ok(FailOutcome::Retry { delay_seconds }) => {
                        let jobs = CrawlJobRepository::new(self.pool.clone());
                        let note = format!(
                            "retrying (attempt {}/{}): {}",
                            task.attempts, task.max_attempts, message
                        );
                        if let Err(e) = jobs.mark_retrying(task.job_id, &note).await {
                            error!(job_id = task.job_id, "failed to flag job for retry: {e}");
                        }
                        info!(task_id = task.id, delay_seconds, "retry scheduled");
                    }
                    Ok(FailOutcome::DeadLetter) => {
                        error!(task_id = task.id, "task exhausted retries");
                        self.mark_job_failed(task.job_id, &message).await;
                    }
                    Err(QueueError::NotOwner { .. }) => {
                        warn!(task_id = task.id, "lease lost before failure was recorded");
                    }
                    Err(e) => error!(task_id = task.id, "failed to record task failure: {e}"),
                }
            }
        }
    }

    /// Best-effort: keep the job row in step with a task that will not run
    /// again.
    async fn mark_job_failed(&self, job_id: i64, message: &str) {
        let jobs = CrawlJobRepository::new(self.pool.clone());
        if let Err(e) = jobs.mark_failed(job_id, message).await {
            error!(job_id, "failed to mark job failed: {e}");
        }
    }
}

async fn heartbeat_loop(
    queue: TaskQueue,
    task_id: i64,
    worker_id: String,
    interval_seconds: u64,
    lease_seconds: i64,
    stop: CancellationToken,
    crawl_cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
    tick.tick().await; // immediate first tick

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tick.tick() => {
                match queue.heartbeat(task_id, &worker_id, lease_seconds).await {
                    Ok(()) => {}
                    Err(QueueError::NotOwner { .. }) => {
                        // The lease moved on; whatever we are doing no longer
                        // belongs to us.
                        warn!(task_id, "heartbeat rejected; abandoning crawl");
                        crawl_cancel.cancel();
                        return;
                    }
                    Err(e) => warn!(task_id, "heartbeat error: {e}"),
                }
            }
        }
    }
}
