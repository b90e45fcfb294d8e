//! The crawl pipeline a worker runs for one claimed task.
//!
//! Consumes crawler events, persists pages incrementally, keeps the job
//! counters current, runs change tracking against the prior successful
//! crawl, and invokes the assembler when the run produced changes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use sqlx::{Pool, Postgres};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assembler::Assembler;
use crate::changes;
use crate::config::Config;
use crate::crawler::{CrawlEvent, CrawlLimits, Crawler, CrawledPage};
use crate::entities::{CrawlTask, Page, PageStatus, Site};
use crate::repositories::{
    CrawlJobRepository, GeneratedFileRepository, NewPage, PageRepository, SiteRepository,
};

/// A whole crawl may not run longer than this before the task is failed
/// back for retry.
const CRAWL_SOFT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// How often the pipeline re-checks that the site still exists.
const CANCELLATION_POLL: Duration = Duration::from_secs(5);

/// Task-level failure, split by retry semantics.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Retry with backoff (network faults, timeouts, database hiccups).
    #[error("{0}")]
    Transient(String),

    /// Straight to dead letter (malformed URL, deleted site, policy).
    #[error("{0}")]
    Permanent(String),
}

pub async fn run_crawl_task(
    pool: &Pool<Postgres>,
    config: &Config,
    assembler: &Arc<dyn Assembler>,
    task: &CrawlTask,
    cancel: CancellationToken,
) -> Result<(), TaskError> {
    let jobs = CrawlJobRepository::new(pool.clone());
    let sites = SiteRepository::new(pool.clone());
    let pages = PageRepository::new(pool.clone());

    let job = jobs
        .find_by_id(task.job_id)
        .await
        .map_err(transient)?
        .ok_or_else(|| TaskError::Permanent(format!("crawl job {} no longer exists", task.job_id)))?;
    let site = sites
        .find_by_id(job.site_id)
        .await
        .map_err(transient)?
        .ok_or_else(|| TaskError::Permanent("cancelled: site deleted".to_string()))?;

    jobs.mark_running(job.id).await.map_err(transient)?;
    info!(job_id = job.id, site = %site.url, attempt = task.attempts, "crawl started");

    // Baseline for change tracking: pages of the last completed crawl.
    let prior_pages: HashMap<String, Page> = match jobs
        .latest_completed(site.id, job.id)
        .await
        .map_err(transient)?
    {
        Some(prior_job) => pages
            .present_for_job(prior_job.id)
            .await
            .map_err(transient)?
            .into_iter()
            .map(|page| (page.url.clone(), page))
            .collect(),
        None => HashMap::new(),
    };
    let prior_hashes: HashMap<String, String> = prior_pages
        .iter()
        .map(|(url, page)| (url.clone(), page.content_hash.clone()))
        .collect();

    let limits = CrawlLimits::new(job.max_depth, job.max_pages, config.crawl_concurrency);
    let crawl_cancel = cancel.child_token();
    let crawler = Crawler::new(&site.url, limits, prior_hashes.clone(), crawl_cancel.clone())
        .map_err(|e| TaskError::Permanent(format!("invalid site url: {e}")))?;

    // A deleted site cancels the crawl; the in-flight fetch is allowed to
    // finish before the fetchers notice.
    let watcher = {
        let sites = sites.clone();
        let crawl_cancel = crawl_cancel.clone();
        let site_id = site.id;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CANCELLATION_POLL).await;
                match sites.exists(site_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(site_id, "site deleted mid-crawl; cancelling");
                        crawl_cancel.cancel();
                        return;
                    }
                    Err(_) => {}
                }
            }
        })
    };

    let ctx = JobContext {
        jobs: &jobs,
        pages: &pages,
        site: &site,
        job_id: job.id,
    };
    let result = consume_events(&ctx, crawler.start(), &prior_pages, &prior_hashes).await;
    watcher.abort();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            let _ = jobs.mark_failed(job.id, &err.to_string()).await;
            return Err(err);
        }
    };

    finish(pool, assembler, &site, job.id, outcome).await
}

struct JobContext<'a> {
    jobs: &'a CrawlJobRepository,
    pages: &'a PageRepository,
    site: &'a Site,
    job_id: i64,
}

/// Everything `finish` needs once the event stream has completed.
struct CrawlOutcome {
    added: i32,
    updated: i32,
    removed: i32,
    root_page: Option<CrawledPage>,
}

async fn consume_events(
    ctx: &JobContext<'_>,
    mut events: tokio::sync::mpsc::Receiver<CrawlEvent>,
    prior_pages: &HashMap<String, Page>,
    prior_hashes: &HashMap<String, String>,
) -> Result<CrawlOutcome, TaskError> {
    let deadline = tokio::time::Instant::now() + CRAWL_SOFT_TIMEOUT;
    let mut seen: HashSet<String> = HashSet::new();
    let mut added = 0;
    let mut updated = 0;
    let mut root_page: Option<CrawledPage> = None;

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::time::sleep_until(deadline) => {
                return Err(TaskError::Transient("crawl exceeded soft timeout".to_string()));
            }
        };
        let Some(event) = event else {
            return Err(TaskError::Transient(
                "crawler stopped without a terminal event".to_string(),
            ));
        };

        match event {
            CrawlEvent::PageCrawled(page) => {
                let status = changes::classify(prior_hashes, &page.url, &page.content_hash);
                match status {
                    PageStatus::Added => added += 1,
                    PageStatus::Updated => updated += 1,
                    _ => {}
                }
                seen.insert(page.url.clone());
                if page.depth == 0 && root_page.is_none() && page.url == ctx.site.url {
                    root_page = Some(page.clone());
                }

                let record = NewPage {
                    url: page.url,
                    title: page.title,
                    description: page.description,
                    headings: page.headings,
                    category: page.category.as_str().to_string(),
                    relevance_score: page.relevance,
                    depth: page.depth as i32,
                    content_hash: page.content_hash,
                    status,
                };
                ctx.pages
                    .insert(ctx.site.id, ctx.job_id, &record)
                    .await
                    .map_err(transient)?;
            }
            CrawlEvent::Progress(progress) => {
                ctx.jobs
                    .update_counters(ctx.job_id, &progress)
                    .await
                    .map_err(transient)?;
            }
            CrawlEvent::Completed => {
                let removed = persist_removed(ctx, prior_pages, prior_hashes, &seen).await?;
                return Ok(CrawlOutcome {
                    added,
                    updated,
                    removed,
                    root_page,
                });
            }
            CrawlEvent::Failed { error } => {
                return Err(if error == "cancelled" {
                    TaskError::Permanent("cancelled".to_string())
                } else {
                    TaskError::Transient(error)
                });
            }
        }
    }
}

/// Tombstone pages that existed in the prior crawl but were not seen in this
/// one.
async fn persist_removed(
    ctx: &JobContext<'_>,
    prior_pages: &HashMap<String, Page>,
    prior_hashes: &HashMap<String, String>,
    seen: &HashSet<String>,
) -> Result<i32, TaskError> {
    let mut removed = 0;
    for url in changes::removed_urls(prior_hashes, seen) {
        let prior = &prior_pages[url];
        let record = NewPage {
            url: prior.url.clone(),
            title: prior.title.clone(),
            description: prior.description.clone(),
            headings: prior.headings.0.clone(),
            category: prior.category.clone(),
            relevance_score: prior.relevance_score,
            depth: prior.depth,
            content_hash: prior.content_hash.clone(),
            status: PageStatus::Removed,
        };
        ctx.pages
            .insert(ctx.site.id, ctx.job_id, &record)
            .await
            .map_err(transient)?;
        removed += 1;
    }
    Ok(removed)
}

async fn finish(
    pool: &Pool<Postgres>,
    assembler: &Arc<dyn Assembler>,
    site: &Site,
    job_id: i64,
    outcome: CrawlOutcome,
) -> Result<(), TaskError> {
    let jobs = CrawlJobRepository::new(pool.clone());
    let sites = SiteRepository::new(pool.clone());
    let pages = PageRepository::new(pool.clone());
    let generated = GeneratedFileRepository::new(pool.clone());

    if let Some(root) = &outcome.root_page {
        sites
            .update_metadata(site.id, root.title.as_deref(), root.description.as_deref())
            .await
            .map_err(transient)?;
    }

    let pages_changed = outcome.added + outcome.updated + outcome.removed;
    let needs_document = pages_changed > 0
        || generated
            .latest_for_site(site.id)
            .await
            .map_err(transient)?
            .is_none();

    if needs_document {
        let current_site = sites
            .find_by_id(site.id)
            .await
            .map_err(transient)?
            .ok_or_else(|| TaskError::Permanent("cancelled: site deleted".to_string()))?;
        let current_pages = pages.present_for_job(job_id).await.map_err(transient)?;

        // The assembler runs once per successful crawl; a failure marks the
        // job failed but the persisted pages stay.
        let content = assembler
            .assemble(&current_site, &current_pages)
            .await
            .map_err(|e| {
                let message = format!("assembler failed: {e:#}");
                TaskError::Transient(message)
            });
        let content = match content {
            Ok(content) => content,
            Err(err) => {
                let _ = jobs.mark_failed(job_id, &err.to_string()).await;
                return Err(err);
            }
        };

        let hash = changes::document_hash(&content);
        generated
            .insert(site.id, Some(job_id), &content, &hash)
            .await
            .map_err(transient)?;
        info!(site_id = site.id, job_id, "generated document stored");
    } else {
        info!(site_id = site.id, job_id, "no changes; document generation skipped");
    }

    jobs.mark_completed(job_id, pages_changed)
        .await
        .map_err(transient)?;
    info!(
        job_id,
        added = outcome.added,
        updated = outcome.updated,
        removed = outcome.removed,
        "crawl completed"
    );
    Ok(())
}

fn transient(err: anyhow::Error) -> TaskError {
    TaskError::Transient(format!("{err:#}"))
}
