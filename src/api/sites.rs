use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::dtos::{
    CreateSiteRequest, SiteCreatedResponse, SiteListResponse, SiteResponse,
};
use crate::api::error::ApiError;
use crate::app_state::AppState;
use crate::crawler::{CrawlLimits, urls};
use crate::queue::TaskQueue;
use crate::repositories::{CrawlJobRepository, GeneratedFileRepository, SiteRepository};

/// Register a site (idempotent on the normalized URL) and enqueue its
/// initial crawl.
pub async fn create_site(
    State(state): State<AppState>,
    Json(payload): Json<CreateSiteRequest>,
) -> Result<(StatusCode, Json<SiteCreatedResponse>), ApiError> {
    payload
        .validate()
        .map_err(|message| ApiError::unprocessable("invalid_url", message))?;
    let normalized = urls::normalize(&payload.url)
        .map_err(|e| ApiError::unprocessable("invalid_url", e.to_string()))?;
    let domain = normalized.host_str().unwrap_or_default().to_string();

    let sites = SiteRepository::new(state.db_pool.clone());
    let site = sites.upsert(normalized.as_str(), &domain).await?;

    let job_id = enqueue_crawl(
        &state,
        site.id,
        payload.max_depth,
        payload.max_pages,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(SiteCreatedResponse {
            site: site.into(),
            crawl_job_id: job_id,
        }),
    ))
}

pub async fn list_sites(
    State(state): State<AppState>,
) -> Result<Json<SiteListResponse>, ApiError> {
    let sites = SiteRepository::new(state.db_pool.clone()).list().await?;
    Ok(Json(SiteListResponse {
        sites: sites.into_iter().map(SiteResponse::from).collect(),
    }))
}

pub async fn get_site(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SiteResponse>, ApiError> {
    let site = SiteRepository::new(state.db_pool.clone())
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("site not found"))?;
    Ok(Json(site.into()))
}

/// Delete a site and everything it owns. A crawl running for the site will
/// notice and stop.
pub async fn delete_site(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = SiteRepository::new(state.db_pool.clone()).delete(id).await?;
    if !deleted {
        return Err(ApiError::not_found("site not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Current generated document, served as markdown.
pub async fn get_llms_txt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let sites = SiteRepository::new(state.db_pool.clone());
    if !sites.exists(id).await? {
        return Err(ApiError::not_found("site not found"));
    }

    let file = GeneratedFileRepository::new(state.db_pool.clone())
        .latest_for_site(id)
        .await?
        .ok_or_else(|| ApiError::not_found("no document generated yet"))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        file.content,
    )
        .into_response())
}

/// Create a pending job and its queue task for a site.
pub(crate) async fn enqueue_crawl(
    state: &AppState,
    site_id: i64,
    max_depth: Option<i32>,
    max_pages: Option<i32>,
) -> Result<i64, ApiError> {
    let limits = CrawlLimits::new(
        max_depth.unwrap_or(state.config.max_crawl_depth),
        max_pages.unwrap_or(state.config.max_crawl_pages),
        state.config.crawl_concurrency,
    );

    let jobs = CrawlJobRepository::new(state.db_pool.clone());
    let job = jobs
        .create(site_id, limits.max_pages as i32, limits.max_depth as i32)
        .await?;

    let queue = TaskQueue::new(state.db_pool.clone());
    queue
        .enqueue(
            job.id,
            super::crawl::USER_PRIORITY,
            Some(&format!("crawl-job-{}", job.id)),
            state.config.task_max_attempts,
        )
        .await?;

    Ok(job.id)
}
