use anyhow::Result;
use sqlx::{Pool, Postgres};

use crate::crawler::CrawlProgress;
use crate::entities::{CrawlJob, JobStatus};

const JOB_COLUMNS: &str = "id, site_id, status, pages_found, pages_crawled, pages_changed, \
     pages_skipped, max_pages, max_depth, started_at, finished_at, error_message, \
     created_at, updated_at";

#[derive(Clone)]
pub struct CrawlJobRepository {
    pool: Pool<Postgres>,
}

impl CrawlJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn create(&self, site_id: i64, max_pages: i32, max_depth: i32) -> Result<CrawlJob> {
        let job = sqlx::query_as::<_, CrawlJob>(&format!(
            r#"
            INSERT INTO crawl_jobs (site_id, max_pages, max_depth)
            VALUES ($1, $2, $3)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(site_id)
        .bind(max_pages)
        .bind(max_depth)
        .fetch_one(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<CrawlJob>> {
        let job = sqlx::query_as::<_, CrawlJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn list_for_site(&self, site_id: i64, limit: i64) -> Result<Vec<CrawlJob>> {
        let jobs = sqlx::query_as::<_, CrawlJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE site_id = $1 ORDER BY id DESC LIMIT $2"
        ))
        .bind(site_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// The most recent completed job for a site, excluding `exclude_job_id`.
    /// Supplies the prior-run baseline for change tracking.
    pub async fn latest_completed(
        &self,
        site_id: i64,
        exclude_job_id: i64,
    ) -> Result<Option<CrawlJob>> {
        let job = sqlx::query_as::<_, CrawlJob>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM crawl_jobs
            WHERE site_id = $1 AND id <> $2 AND status = 'completed'
            ORDER BY id DESC
            LIMIT 1
            "#
        ))
        .bind(site_id)
        .bind(exclude_job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn mark_running(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'running',
                started_at = now(),
                finished_at = NULL,
                error_message = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update live counters. `GREATEST` keeps them monotonic even if a stale
    /// progress snapshot lands late.
    pub async fn update_counters(&self, id: i64, progress: &CrawlProgress) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET pages_found = GREATEST(pages_found, $2),
                pages_crawled = GREATEST(pages_crawled, $3),
                pages_changed = GREATEST(pages_changed, $4),
                pages_skipped = GREATEST(pages_skipped, $5),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(progress.found as i32)
        .bind(progress.crawled as i32)
        .bind(progress.changed as i32)
        .bind(progress.skipped as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, id: i64, pages_changed: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'completed',
                pages_changed = GREATEST(pages_changed, $2),
                finished_at = now(),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(pages_changed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'failed',
                finished_at = now(),
                error_message = $2,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Put a job back to pending while its task waits for a retry.
    pub async fn mark_retrying(&self, id: i64, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'pending',
                finished_at = NULL,
                error_message = $2,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn status(&self, id: i64) -> Result<Option<JobStatus>> {
        let row: Option<(JobStatus,)> =
            sqlx::query_as("SELECT status FROM crawl_jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(status,)| status))
    }
}
