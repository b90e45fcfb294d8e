use std::collections::HashMap;

use anyhow::Result;
use sqlx::types::Json;
use sqlx::{Pool, Postgres};

use crate::entities::{Page, PageStatus};

const PAGE_COLUMNS: &str = "id, site_id, crawl_job_id, url, title, description, headings, \
     category, relevance_score, depth, content_hash, status, first_seen_at, last_seen_at";

/// Fields of a page row to persist for the current crawl job.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub headings: Vec<String>,
    pub category: String,
    pub relevance_score: f64,
    pub depth: i32,
    pub content_hash: String,
    pub status: PageStatus,
}

#[derive(Clone)]
pub struct PageRepository {
    pool: Pool<Postgres>,
}

impl PageRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, site_id: i64, crawl_job_id: i64, page: &NewPage) -> Result<Page> {
        // `first_seen_at` survives across runs for a logical (site, url) page.
        let inserted = sqlx::query_as::<_, Page>(&format!(
            r#"
            INSERT INTO pages (
                site_id, crawl_job_id, url, title, description, headings,
                category, relevance_score, depth, content_hash, status, first_seen_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                COALESCE(
                    (SELECT MIN(first_seen_at) FROM pages WHERE site_id = $1 AND url = $3),
                    now()
                )
            )
            ON CONFLICT (crawl_job_id, url) DO UPDATE SET last_seen_at = now()
            RETURNING {PAGE_COLUMNS}
            "#
        ))
        .bind(site_id)
        .bind(crawl_job_id)
        .bind(&page.url)
        .bind(&page.title)
        .bind(&page.description)
        .bind(Json(&page.headings))
        .bind(&page.category)
        .bind(page.relevance_score)
        .bind(page.depth)
        .bind(&page.content_hash)
        .bind(page.status)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    /// All pages of a job, oldest first. `id` is the stream replay cursor.
    pub async fn for_job(&self, crawl_job_id: i64) -> Result<Vec<Page>> {
        let pages = sqlx::query_as::<_, Page>(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE crawl_job_id = $1 ORDER BY id ASC"
        ))
        .bind(crawl_job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(pages)
    }

    /// Pages of a job persisted after the cursor, in id order.
    pub async fn for_job_after(
        &self,
        crawl_job_id: i64,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<Page>> {
        let pages = sqlx::query_as::<_, Page>(&format!(
            r#"
            SELECT {PAGE_COLUMNS}
            FROM pages
            WHERE crawl_job_id = $1 AND id > $2
            ORDER BY id ASC
            LIMIT $3
            "#
        ))
        .bind(crawl_job_id)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(pages)
    }

    /// Pages present in a run (everything but `removed` tombstones).
    pub async fn present_for_job(&self, crawl_job_id: i64) -> Result<Vec<Page>> {
        let pages = sqlx::query_as::<_, Page>(&format!(
            r#"
            SELECT {PAGE_COLUMNS}
            FROM pages
            WHERE crawl_job_id = $1 AND status <> 'removed'
            ORDER BY id ASC
            "#
        ))
        .bind(crawl_job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(pages)
    }

    /// URL -> content hash for a prior job's present pages.
    pub async fn hashes_for_job(&self, crawl_job_id: i64) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT url, content_hash FROM pages WHERE crawl_job_id = $1 AND status <> 'removed'",
        )
        .bind(crawl_job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}
