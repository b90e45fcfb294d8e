//! HTTP surface. The API process records state and enqueues work; crawling
//! itself always happens in worker processes.

pub mod crawl;
pub mod dtos;
pub mod error;
pub mod schedules;
pub mod sites;
pub mod stream;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::app_state::AppState;
use crate::health;

pub fn router(state: AppState) -> Router {
    let site_routes = Router::new()
        .route("/", post(sites::create_site).get(sites::list_sites))
        .route("/{id}", get(sites::get_site).delete(sites::delete_site))
        .route(
            "/{id}/crawl",
            post(crawl::start_crawl).get(crawl::list_crawl_jobs),
        )
        .route("/{id}/crawl/{job_id}", get(crawl::get_crawl_job))
        .route("/{id}/crawl/{job_id}/stream", get(stream::stream_crawl))
        .route("/{id}/llms-txt", get(sites::get_llms_txt))
        .route(
            "/{id}/schedule",
            put(schedules::upsert_schedule)
                .get(schedules::get_schedule)
                .delete(schedules::delete_schedule),
        );

    Router::new()
        .route("/healthz", get(health::health_check))
        .nest("/sites", site_routes)
        .with_state(state)
}
