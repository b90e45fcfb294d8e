use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::api::dtos::{CrawlJobListResponse, CrawlJobResponse, StartCrawlRequest};
use crate::api::error::ApiError;
use crate::api::sites::enqueue_crawl;
use crate::app_state::AppState;
use crate::repositories::{CrawlJobRepository, SiteRepository};

/// Priority for user-triggered crawls; outranks cron fires.
pub const USER_PRIORITY: i32 = 10;

const JOB_LIST_LIMIT: i64 = 20;

pub async fn start_crawl(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
    payload: Option<Json<StartCrawlRequest>>,
) -> Result<(StatusCode, Json<CrawlJobResponse>), ApiError> {
    let sites = SiteRepository::new(state.db_pool.clone());
    if !sites.exists(site_id).await? {
        return Err(ApiError::not_found("site not found"));
    }

    let Json(payload) = payload.unwrap_or_default();
    let job_id = enqueue_crawl(&state, site_id, payload.max_depth, payload.max_pages).await?;

    let job = CrawlJobRepository::new(state.db_pool.clone())
        .find_by_id(job_id)
        .await?
        .ok_or_else(|| ApiError::internal("job vanished after enqueue"))?;
    Ok((StatusCode::CREATED, Json(job.into())))
}

pub async fn list_crawl_jobs(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
) -> Result<Json<CrawlJobListResponse>, ApiError> {
    let sites = SiteRepository::new(state.db_pool.clone());
    if !sites.exists(site_id).await? {
        return Err(ApiError::not_found("site not found"));
    }

    let jobs = CrawlJobRepository::new(state.db_pool.clone())
        .list_for_site(site_id, JOB_LIST_LIMIT)
        .await?;
    Ok(Json(CrawlJobListResponse {
        jobs: jobs.into_iter().map(CrawlJobResponse::from).collect(),
    }))
}

pub async fn get_crawl_job(
    State(state): State<AppState>,
    Path((site_id, job_id)): Path<(i64, i64)>,
) -> Result<Json<CrawlJobResponse>, ApiError> {
    let job = CrawlJobRepository::new(state.db_pool.clone())
        .find_by_id(job_id)
        .await?
        .filter(|job| job.site_id == site_id)
        .ok_or_else(|| ApiError::not_found("crawl job not found"))?;
    Ok(Json(job.into()))
}
