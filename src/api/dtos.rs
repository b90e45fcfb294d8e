use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{CrawlJob, JobStatus, Schedule, Site};

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    pub url: String,
    pub max_depth: Option<i32>,
    pub max_pages: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StartCrawlRequest {
    pub max_depth: Option<i32>,
    pub max_pages: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertScheduleRequest {
    pub cron_expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct SiteResponse {
    pub id: i64,
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Site> for SiteResponse {
    fn from(site: Site) -> Self {
        Self {
            id: site.id,
            url: site.url,
            domain: site.domain,
            title: site.title,
            description: site.description,
            created_at: site.created_at,
            updated_at: site.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SiteCreatedResponse {
    #[serde(flatten)]
    pub site: SiteResponse,
    pub crawl_job_id: i64,
}

#[derive(Debug, Serialize)]
pub struct SiteListResponse {
    pub sites: Vec<SiteResponse>,
}

#[derive(Debug, Serialize)]
pub struct CrawlJobResponse {
    pub id: i64,
    pub site_id: i64,
    pub status: JobStatus,
    pub pages_found: i32,
    pub pages_crawled: i32,
    pub pages_changed: i32,
    pub pages_skipped: i32,
    pub max_pages: i32,
    pub max_depth: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CrawlJob> for CrawlJobResponse {
    fn from(job: CrawlJob) -> Self {
        Self {
            id: job.id,
            site_id: job.site_id,
            status: job.status,
            pages_found: job.pages_found,
            pages_crawled: job.pages_crawled,
            pages_changed: job.pages_changed,
            pages_skipped: job.pages_skipped,
            max_pages: job.max_pages,
            max_depth: job.max_depth,
            started_at: job.started_at,
            finished_at: job.finished_at,
            error_message: job.error_message,
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CrawlJobListResponse {
    pub jobs: Vec<CrawlJobResponse>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub id: i64,
    pub site_id: i64,
    pub cron_expression: String,
    pub timezone: String,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl From<Schedule> for ScheduleResponse {
    fn from(schedule: Schedule) -> Self {
        Self {
            id: schedule.id,
            site_id: schedule.site_id,
            cron_expression: schedule.cron_expression,
            timezone: schedule.timezone,
            is_active: schedule.is_active,
            last_run_at: schedule.last_run_at,
            next_run_at: schedule.next_run_at,
        }
    }
}

impl CreateSiteRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("url cannot be empty".to_string());
        }
        if self.url.len() > 2048 {
            return Err("url too long".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_site_request_validation() {
        let ok = CreateSiteRequest {
            url: "https://example.com".to_string(),
            max_depth: None,
            max_pages: None,
        };
        assert!(ok.validate().is_ok());

        let empty = CreateSiteRequest {
            url: String::new(),
            max_depth: None,
            max_pages: None,
        };
        assert!(empty.validate().is_err());

        let long = CreateSiteRequest {
            url: format!("https://example.com/{}", "a".repeat(3000)),
            max_depth: None,
            max_pages: None,
        };
        assert!(long.validate().is_err());
    }
}
