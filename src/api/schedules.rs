use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;

use crate::api::dtos::{ScheduleResponse, UpsertScheduleRequest};
use crate::api::error::ApiError;
use crate::app_state::AppState;
use crate::repositories::{ScheduleRepository, ScheduleUpsert, SiteRepository};
use crate::scheduler;

/// Upsert the site's schedule. The next fire time is computed here so the
/// worker-side scheduler only ever reads persisted state.
pub async fn upsert_schedule(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
    Json(payload): Json<UpsertScheduleRequest>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let sites = SiteRepository::new(state.db_pool.clone());
    if !sites.exists(site_id).await? {
        return Err(ApiError::not_found("site not found"));
    }

    scheduler::validate(&payload.cron_expression, &payload.timezone)
        .map_err(|e| ApiError::unprocessable("invalid_schedule", e.to_string()))?;

    let next_run_at = if payload.is_active {
        scheduler::next_occurrence(&payload.cron_expression, &payload.timezone, Utc::now())
            .map_err(|e| ApiError::unprocessable("invalid_schedule", e.to_string()))?
    } else {
        None
    };

    let schedule = ScheduleRepository::new(state.db_pool.clone())
        .upsert(&ScheduleUpsert {
            site_id,
            cron_expression: payload.cron_expression,
            timezone: payload.timezone,
            is_active: payload.is_active,
            next_run_at,
        })
        .await?;
    Ok(Json(schedule.into()))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let schedule = ScheduleRepository::new(state.db_pool.clone())
        .find_by_site(site_id)
        .await?
        .ok_or_else(|| ApiError::not_found("no schedule for site"))?;
    Ok(Json(schedule.into()))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = ScheduleRepository::new(state.db_pool.clone())
        .delete_for_site(site_id)
        .await?;
    if !deleted {
        return Err(ApiError::not_found("no schedule for site"));
    }
    Ok(StatusCode::NO_CONTENT)
}
