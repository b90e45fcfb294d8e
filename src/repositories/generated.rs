use anyhow::Result;
use sqlx::{Pool, Postgres};

use crate::entities::GeneratedFile;

const FILE_COLUMNS: &str =
    "id, site_id, crawl_job_id, content, content_hash, is_edited, created_at";

#[derive(Clone)]
pub struct GeneratedFileRepository {
    pool: Pool<Postgres>,
}

impl GeneratedFileRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Append a new document version. Rows are never updated in place; the
    /// current document is simply the newest row per site.
    pub async fn insert(
        &self,
        site_id: i64,
        crawl_job_id: Option<i64>,
        content: &str,
        content_hash: &str,
    ) -> Result<GeneratedFile> {
        let file = sqlx::query_as::<_, GeneratedFile>(&format!(
            r#"
            INSERT INTO generated_files (site_id, crawl_job_id, content, content_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(site_id)
        .bind(crawl_job_id)
        .bind(content)
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(file)
    }

    pub async fn latest_for_site(&self, site_id: i64) -> Result<Option<GeneratedFile>> {
        let file = sqlx::query_as::<_, GeneratedFile>(&format!(
            r#"
            SELECT {FILE_COLUMNS}
            FROM generated_files
            WHERE site_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#
        ))
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }
}
