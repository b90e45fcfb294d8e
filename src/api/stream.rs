//! Live crawl progress over server-sent events.
//!
//! Worker and API are separate processes, so the stream is derived entirely
//! from persisted rows: connected observers first get every page already
//! stored for the job (ascending id), then new rows as the worker writes
//! them, then the terminal frame. Reconnect replay is free for the same
//! reason.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use crate::api::error::ApiError;
use crate::app_state::AppState;
use crate::entities::{CrawlJob, JobStatus, Page};
use crate::repositories::{CrawlJobRepository, PageRepository};

/// Poll cadence against the database.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// A frame goes out at least this often to keep intermediaries from timing
/// out the connection.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
/// Page rows fetched per poll query.
const PAGE_BATCH: i64 = 200;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamFrame {
    PageCrawled {
        url: String,
        title: Option<String>,
        description: Option<String>,
        category: String,
        relevance: f64,
        depth: i32,
        status: crate::entities::PageStatus,
    },
    Progress {
        found: i32,
        crawled: i32,
        changed: i32,
        skipped: i32,
        max_pages: i32,
    },
    Completed,
    Failed {
        error: String,
    },
    Heartbeat,
}

impl StreamFrame {
    fn page(page: &Page) -> Self {
        Self::PageCrawled {
            url: page.url.clone(),
            title: page.title.clone(),
            description: page.description.clone(),
            category: page.category.clone(),
            relevance: page.relevance_score,
            depth: page.depth,
            status: page.status,
        }
    }

    fn progress(job: &CrawlJob) -> Self {
        Self::Progress {
            found: job.pages_found,
            crawled: job.pages_crawled,
            changed: job.pages_changed,
            skipped: job.pages_skipped,
            max_pages: job.max_pages,
        }
    }
}

pub async fn stream_crawl(
    State(state): State<AppState>,
    Path((site_id, job_id)): Path<(i64, i64)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let jobs = CrawlJobRepository::new(state.db_pool.clone());
    jobs.find_by_id(job_id)
        .await?
        .filter(|job| job.site_id == site_id)
        .ok_or_else(|| ApiError::not_found("crawl job not found"))?;

    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(poll_loop(state, job_id, tx));

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream))
}

async fn poll_loop(state: AppState, job_id: i64, tx: mpsc::Sender<Event>) {
    let jobs = CrawlJobRepository::new(state.db_pool.clone());
    let pages = PageRepository::new(state.db_pool.clone());

    let mut cursor: i64 = 0;
    let mut last_progress: Option<(i32, i32, i32, i32)> = None;
    let mut last_sent = Instant::now();

    loop {
        // New pages since the cursor, in persistence order.
        loop {
            let batch = match pages.for_job_after(job_id, cursor, PAGE_BATCH).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(job_id, "stream page query failed: {e}");
                    return;
                }
            };
            let done = (batch.len() as i64) < PAGE_BATCH;
            for page in &batch {
                cursor = page.id;
                if !send(&tx, &mut last_sent, StreamFrame::page(page)).await {
                    return;
                }
            }
            if done {
                break;
            }
        }

        let job = match jobs.find_by_id(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(job_id, "job deleted; closing stream");
                return;
            }
            Err(e) => {
                error!(job_id, "stream job query failed: {e}");
                return;
            }
        };

        let counters = (
            job.pages_found,
            job.pages_crawled,
            job.pages_changed,
            job.pages_skipped,
        );
        if last_progress != Some(counters) {
            last_progress = Some(counters);
            if !send(&tx, &mut last_sent, StreamFrame::progress(&job)).await {
                return;
            }
        }

        if job.status.is_terminal() {
            let terminal = match job.status {
                JobStatus::Failed => StreamFrame::Failed {
                    error: job
                        .error_message
                        .unwrap_or_else(|| "crawl failed".to_string()),
                },
                _ => StreamFrame::Completed,
            };
            let _ = send(&tx, &mut last_sent, terminal).await;
            return;
        }

        if last_sent.elapsed() >= KEEPALIVE_INTERVAL
            && !send(&tx, &mut last_sent, StreamFrame::Heartbeat).await
        {
            return;
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Send one frame; false when the observer disconnected.
async fn send(tx: &mpsc::Sender<Event>, last_sent: &mut Instant, frame: StreamFrame) -> bool {
    let event = match Event::default().event("message").json_data(&frame) {
        Ok(event) => event,
        Err(e) => {
            error!("failed to serialize stream frame: {e}");
            return false;
        }
    };
    *last_sent = Instant::now();
    tx.send(event).await.is_ok()
}
