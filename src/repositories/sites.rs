use anyhow::Result;
use sqlx::{Pool, Postgres};

use crate::entities::Site;

const SITE_COLUMNS: &str = "id, url, domain, title, description, created_at, updated_at";

#[derive(Clone)]
pub struct SiteRepository {
    pool: Pool<Postgres>,
}

impl SiteRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a site, or return the existing row for an already-registered
    /// normalized URL.
    pub async fn upsert(&self, url: &str, domain: &str) -> Result<Site> {
        let site = sqlx::query_as::<_, Site>(&format!(
            r#"
            INSERT INTO sites (url, domain)
            VALUES ($1, $2)
            ON CONFLICT (url) DO UPDATE SET updated_at = now()
            RETURNING {SITE_COLUMNS}
            "#
        ))
        .bind(url)
        .bind(domain)
        .fetch_one(&self.pool)
        .await?;
        Ok(site)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Site>> {
        let site = sqlx::query_as::<_, Site>(&format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(site)
    }

    pub async fn list(&self) -> Result<Vec<Site>> {
        let sites = sqlx::query_as::<_, Site>(&format!(
            "SELECT {SITE_COLUMNS} FROM sites ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(sites)
    }

    /// Delete a site; dependent jobs, tasks, pages, documents and schedules
    /// cascade away. Returns false for an unknown id.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sites WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn exists(&self, id: i64) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM sites WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Refresh site metadata from the latest crawl's root page.
    pub async fn update_metadata(
        &self,
        id: i64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sites
            SET title = COALESCE($2, title),
                description = COALESCE($3, description),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
