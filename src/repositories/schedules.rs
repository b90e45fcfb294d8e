use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::entities::Schedule;

const SCHEDULE_COLUMNS: &str = "id, site_id, cron_expression, timezone, is_active, \
     last_run_at, next_run_at, created_at, updated_at";

/// Upsert payload; at most one schedule exists per site.
#[derive(Debug, Clone)]
pub struct ScheduleUpsert {
    pub site_id: i64,
    pub cron_expression: String,
    pub timezone: String,
    pub is_active: bool,
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ScheduleRepository {
    pool: Pool<Postgres>,
}

impl ScheduleRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, upsert: &ScheduleUpsert) -> Result<Schedule> {
        let schedule = sqlx::query_as::<_, Schedule>(&format!(
            r#"
            INSERT INTO schedules (site_id, cron_expression, timezone, is_active, next_run_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (site_id) DO UPDATE SET
                cron_expression = EXCLUDED.cron_expression,
                timezone = EXCLUDED.timezone,
                is_active = EXCLUDED.is_active,
                next_run_at = EXCLUDED.next_run_at,
                updated_at = now()
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(upsert.site_id)
        .bind(&upsert.cron_expression)
        .bind(&upsert.timezone)
        .bind(upsert.is_active)
        .bind(upsert.next_run_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(schedule)
    }

    pub async fn find_by_site(&self, site_id: i64) -> Result<Option<Schedule>> {
        let schedule = sqlx::query_as::<_, Schedule>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE site_id = $1"
        ))
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(schedule)
    }

    pub async fn delete_for_site(&self, site_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE site_id = $1")
            .bind(site_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Active schedules whose fire time has passed.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let schedules = sqlx::query_as::<_, Schedule>(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS}
            FROM schedules
            WHERE is_active AND next_run_at IS NOT NULL AND next_run_at <= $1
            ORDER BY next_run_at ASC
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(schedules)
    }

    /// Advance the schedule after a fire.
    pub async fn advance(
        &self,
        id: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schedules
            SET last_run_at = $2, next_run_at = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(last_run_at)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn deactivate(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE schedules SET is_active = FALSE, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
