//! Cron-driven scheduler.
//!
//! Runs only in worker processes. Each tick materializes due schedules into
//! pending crawl jobs plus idempotent queue tasks. Cron evaluation is
//! stateless: `next_run_at` lives in the database, so a restart never changes
//! the firing schedule.

pub mod cron_expr;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::entities::Schedule;
use crate::queue::TaskQueue;
use crate::repositories::{CrawlJobRepository, ScheduleRepository};

pub use cron_expr::{ScheduleError, next_occurrence, validate};

/// Priority for cron-enqueued crawls; user-triggered crawls outrank them.
pub const CRON_PRIORITY: i32 = 0;

/// Idempotency key for a scheduled fire, bucketed by the canonical fire time
/// so sub-daily schedules cannot collide within a day.
pub fn idempotency_key(site_id: i64, next_run_at: &chrono::DateTime<Utc>) -> String {
    format!("cron-{}-{}", site_id, next_run_at.to_rfc3339())
}

pub async fn run(
    pool: Pool<Postgres>,
    queue: TaskQueue,
    config: Arc<Config>,
    shutdown: CancellationToken,
) {
    info!(
        sync_interval_seconds = config.scheduler_sync_interval_seconds,
        "scheduler enabled in this worker process"
    );
    let mut tick =
        tokio::time::interval(Duration::from_secs(config.scheduler_sync_interval_seconds));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("scheduler shutting down");
                return;
            }
            _ = tick.tick() => {
                if let Err(e) = run_tick(&pool, &queue, &config).await {
                    error!("scheduler tick failed: {e:#}");
                }
            }
        }
    }
}

async fn run_tick(pool: &Pool<Postgres>, queue: &TaskQueue, config: &Config) -> Result<()> {
    let schedules = ScheduleRepository::new(pool.clone());
    let due = schedules.due(Utc::now()).await?;

    for schedule in due {
        if let Err(e) = fire(pool, queue, config, &schedules, &schedule).await {
            error!(
                schedule_id = schedule.id,
                site_id = schedule.site_id,
                "scheduled fire failed: {e:#}"
            );
        }
    }
    Ok(())
}

async fn fire(
    pool: &Pool<Postgres>,
    queue: &TaskQueue,
    config: &Config,
    schedules: &ScheduleRepository,
    schedule: &Schedule,
) -> Result<()> {
    let now = Utc::now();
    let fire_time = schedule.next_run_at.unwrap_or(now);

    // An unparseable expression can only come from a corrupted row; firing
    // it forever would loop, so the schedule is switched off instead.
    let next_run = match next_occurrence(&schedule.cron_expression, &schedule.timezone, now) {
        Ok(next) => next,
        Err(e) => {
            warn!(
                schedule_id = schedule.id,
                expression = %schedule.cron_expression,
                "deactivating schedule with invalid cron: {e}"
            );
            schedules.deactivate(schedule.id).await?;
            return Ok(());
        }
    };

    let key = idempotency_key(schedule.site_id, &fire_time);
    if queue.find_by_idempotency_key(&key).await?.is_none() {
        let jobs = CrawlJobRepository::new(pool.clone());
        let job = jobs
            .create(schedule.site_id, config.max_crawl_pages, config.max_crawl_depth)
            .await?;
        let task_id = queue
            .enqueue(job.id, CRON_PRIORITY, Some(&key), config.task_max_attempts)
            .await?;
        info!(
            site_id = schedule.site_id,
            job_id = job.id,
            task_id,
            key,
            "scheduled crawl enqueued"
        );
    } else {
        // Another scheduler replica (or an overlapping tick) won the fire.
        info!(site_id = schedule.site_id, key, "scheduled crawl deduplicated");
    }

    schedules.advance(schedule.id, fire_time, next_run).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn idempotency_key_buckets_by_fire_time() {
        let midnight = Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 0).unwrap();
        let one_am = Utc.with_ymd_and_hms(2026, 8, 2, 1, 0, 0).unwrap();

        // Hourly fires on the same day must not collide.
        assert_ne!(idempotency_key(7, &midnight), idempotency_key(7, &one_am));
        assert_eq!(idempotency_key(7, &midnight), idempotency_key(7, &midnight));
        assert_ne!(idempotency_key(7, &midnight), idempotency_key(8, &midnight));
    }
}
