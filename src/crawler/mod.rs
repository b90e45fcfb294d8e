//! Bounded-depth, rate-limited, politeness-aware breadth-first crawler.
//!
//! The crawler is storage-free: it walks the site and emits [`CrawlEvent`]s
//! over a channel in page-completion order. Persistence belongs to the
//! worker pipeline consuming the events.

pub mod events;
pub mod fetch;
pub mod frontier;
pub mod limiter;
pub mod robots;
pub mod sitemap;
pub mod urls;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::categorizer;
use crate::changes::content_hash;
use crate::extractor;

pub use events::{CrawlEvent, CrawlProgress, CrawledPage};
use fetch::fetch_html_with_retry;
use frontier::Frontier;
use limiter::HostRateLimiter;
use robots::RobotsCache;
use urls::UrlError;

/// How long a fetcher dozes when the frontier is momentarily empty.
const IDLE_WAIT: Duration = Duration::from_millis(100);
/// Progress tick interval.
const PROGRESS_TICK: Duration = Duration::from_secs(1);

/// Crawl limits, clamped to the supported ranges.
#[derive(Debug, Clone, Copy)]
pub struct CrawlLimits {
    pub max_depth: u32,
    pub max_pages: u32,
    pub concurrency: usize,
}

impl CrawlLimits {
    pub fn new(max_depth: i32, max_pages: i32, concurrency: usize) -> Self {
        Self {
            max_depth: max_depth.clamp(1, 5) as u32,
            max_pages: max_pages.clamp(50, 500) as u32,
            concurrency: concurrency.max(1),
        }
    }
}

pub struct Crawler {
    seed: Url,
    limits: CrawlLimits,
    prior_hashes: HashMap<String, String>,
    cancel: CancellationToken,
    rate_per_second: f64,
    burst: f64,
}

impl Crawler {
    /// Build a crawler for a seed URL. `prior_hashes` maps normalized page
    /// URLs of the previous successful crawl to their content hashes, used
    /// to keep the `changed` counter live during the run.
    pub fn new(
        seed_url: &str,
        limits: CrawlLimits,
        prior_hashes: HashMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<Self, UrlError> {
        let seed = urls::normalize(seed_url)?;
        Ok(Self {
            seed,
            limits,
            prior_hashes,
            cancel,
            rate_per_second: 2.0,
            burst: 4.0,
        })
    }

    /// Override the per-host request rate (default 2 req/s, burst 4).
    pub fn with_politeness(mut self, rate_per_second: f64, burst: f64) -> Self {
        self.rate_per_second = rate_per_second;
        self.burst = burst;
        self
    }

    /// Start the crawl. Events arrive in page-completion order; the channel
    /// ends with `Completed` or `Failed`.
    pub fn start(self) -> mpsc::Receiver<CrawlEvent> {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            self.run(tx).await;
        });
        rx
    }

    async fn run(self, events: mpsc::Sender<CrawlEvent>) {
        let client = fetch::client();
        let sitemap_urls =
            sitemap::fetch_sitemap_urls(&client, &self.seed, self.limits.max_pages as usize).await;

        let mut state = CrawlState::default();
        state.admit(self.seed.clone(), 0);
        for raw in sitemap_urls {
            let Ok(normalized) = urls::normalize(raw.as_str()) else {
                continue;
            };
            if urls::in_scope(&self.seed, &normalized) && !urls::has_binary_extension(&normalized) {
                state.sitemap.insert(normalized.as_str().to_string());
                state.admit(normalized, 0);
            }
        }
        info!(
            seed = %self.seed,
            sitemap_seeded = state.sitemap.len(),
            max_depth = self.limits.max_depth,
            max_pages = self.limits.max_pages,
            "starting crawl"
        );

        let ctx = Arc::new(CrawlContext {
            seed: self.seed,
            limits: self.limits,
            prior_hashes: self.prior_hashes,
            state: Mutex::new(state),
            wakeup: Notify::new(),
            limiter: HostRateLimiter::new(self.rate_per_second, self.burst),
            robots: RobotsCache::new(client.clone()),
            client,
            cancel: self.cancel,
            events,
        });

        let _ = ctx.events.send(CrawlEvent::Progress(ctx.progress())).await;

        let mut fetchers = JoinSet::new();
        for _ in 0..ctx.limits.concurrency {
            let ctx = ctx.clone();
            fetchers.spawn(fetcher_loop(ctx));
        }

        let ticker = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let mut last = CrawlProgress::default();
                loop {
                    tokio::time::sleep(PROGRESS_TICK).await;
                    let (progress, finished) = {
                        let state = ctx.state.lock().unwrap();
                        (ctx.progress_locked(&state), state.done && state.in_flight == 0)
                    };
                    if progress != last {
                        last = progress;
                        if ctx.events.send(CrawlEvent::Progress(progress)).await.is_err() {
                            break;
                        }
                    }
                    if finished {
                        break;
                    }
                }
            })
        };

        while fetchers.join_next().await.is_some() {}
        ticker.abort();

        let terminal = {
            let state = ctx.state.lock().unwrap();
            if ctx.cancel.is_cancelled() {
                CrawlEvent::Failed {
                    error: "cancelled".to_string(),
                }
            } else if state.crawled == 0
                && let Some(ref error) = state.seed_error
            {
                CrawlEvent::Failed {
                    error: error.clone(),
                }
            } else {
                CrawlEvent::Completed
            }
        };
        let _ = ctx.events.send(CrawlEvent::Progress(ctx.progress())).await;
        let _ = ctx.events.send(terminal).await;
    }
}

#[derive(Default)]
struct CrawlState {
    frontier: Frontier,
    sitemap: std::collections::HashSet<String>,
    in_flight: usize,
    found: u64,
    crawled: u64,
    changed: u64,
    skipped: u64,
    seed_error: Option<String>,
    done: bool,
}

impl CrawlState {
    /// Admit a URL to the frontier if it was never seen; counts as found.
    fn admit(&mut self, url: Url, depth: u32) -> bool {
        if self.frontier.push(url, depth) {
            self.found += 1;
            true
        } else {
            false
        }
    }
}

struct CrawlContext {
    seed: Url,
    limits: CrawlLimits,
    prior_hashes: HashMap<String, String>,
    state: Mutex<CrawlState>,
    wakeup: Notify,
    limiter: HostRateLimiter,
    robots: RobotsCache,
    client: Client,
    cancel: CancellationToken,
    events: mpsc::Sender<CrawlEvent>,
}

impl CrawlContext {
    fn progress(&self) -> CrawlProgress {
        let state = self.state.lock().unwrap();
        self.progress_locked(&state)
    }

    fn progress_locked(&self, state: &CrawlState) -> CrawlProgress {
        CrawlProgress {
            found: state.found,
            crawled: state.crawled,
            changed: state.changed,
            skipped: state.skipped,
            max_pages: self.limits.max_pages,
        }
    }

    async fn emit_progress(&self) {
        let _ = self.events.send(CrawlEvent::Progress(self.progress())).await;
    }
}

async fn fetcher_loop(ctx: Arc<CrawlContext>) {
    loop {
        if ctx.cancel.is_cancelled() {
            let mut state = ctx.state.lock().unwrap();
            state.done = true;
            drop(state);
            ctx.wakeup.notify_waiters();
            return;
        }

        let next = {
            let mut state = ctx.state.lock().unwrap();
            if state.done {
                return;
            }
            if state.crawled >= ctx.limits.max_pages as u64 {
                state.done = true;
                drop(state);
                ctx.wakeup.notify_waiters();
                return;
            }
            match state.frontier.pop() {
                Some(item) => {
                    state.in_flight += 1;
                    Some(item)
                }
                None if state.in_flight == 0 => {
                    state.done = true;
                    drop(state);
                    ctx.wakeup.notify_waiters();
                    return;
                }
                None => None,
            }
        };

        let Some((url, depth)) = next else {
            // Frontier drained but peers are still fetching; doze briefly.
            let _ = tokio::time::timeout(IDLE_WAIT, ctx.wakeup.notified()).await;
            continue;
        };

        process_url(&ctx, url, depth).await;

        ctx.state.lock().unwrap().in_flight -= 1;
        ctx.wakeup.notify_waiters();
    }
}

async fn process_url(ctx: &Arc<CrawlContext>, url: Url, depth: u32) {
    if urls::is_auth_path(&url) {
        debug!(url = %url, "auth path skipped");
        skip(ctx, &url, depth).await;
        return;
    }

    let robots = ctx.robots.for_url(&url).await;
    if !robots.is_allowed(fetch::user_agent(), url.path()) {
        debug!(url = %url, "disallowed by robots.txt");
        skip(ctx, &url, depth).await;
        return;
    }

    ctx.limiter.acquire(url.host_str().unwrap_or("")).await;

    // Cancellation is checked at the start of each fetch; an in-flight
    // request is allowed to finish.
    if ctx.cancel.is_cancelled() {
        return;
    }

    let page = match fetch_html_with_retry(&ctx.client, &url).await {
        Ok(page) => page,
        Err(err) => {
            warn!(url = %url, error = %err, "fetch failed");
            if url == ctx.seed {
                ctx.state.lock().unwrap().seed_error = Some(err.to_string());
            }
            skip(ctx, &url, depth).await;
            return;
        }
    };

    if !urls::in_scope(&ctx.seed, &page.final_url) {
        debug!(url = %url, final_url = %page.final_url, "redirected off-domain");
        skip(ctx, &url, depth).await;
        return;
    }

    let extract = extractor::extract(&page.body, &page.final_url);
    let hash = content_hash(
        extract.title.as_deref(),
        extract.description.as_deref(),
        &extract.headings,
    );
    let category = categorizer::categorize(&url);

    let result = {
        let mut state = ctx.state.lock().unwrap();

        // The page cap is strict: a fetch that lands after the cap filled up
        // is dropped rather than counted.
        if state.crawled >= ctx.limits.max_pages as u64 {
            state.done = true;
            None
        } else {
            Some(record_page(ctx, &mut state, url, depth, extract, hash, category))
        }
    };
    let Some((crawled_page, progress)) = result else {
        ctx.wakeup.notify_waiters();
        return;
    };

    let _ = ctx.events.send(CrawlEvent::PageCrawled(crawled_page)).await;
    let _ = ctx.events.send(CrawlEvent::Progress(progress)).await;
    ctx.wakeup.notify_waiters();
}

fn record_page(
    ctx: &Arc<CrawlContext>,
    state: &mut CrawlState,
    url: Url,
    depth: u32,
    extract: crate::extractor::PageExtract,
    hash: String,
    category: crate::categorizer::Category,
) -> (CrawledPage, CrawlProgress) {
    let in_sitemap = state.sitemap.contains(url.as_str());
    let relevance = categorizer::relevance(&url, depth, category, in_sitemap);

    state.crawled += 1;
    let prior = ctx.prior_hashes.get(url.as_str());
    if prior.map(|h| h != &hash).unwrap_or(true) {
        state.changed += 1;
    }

    if depth < ctx.limits.max_depth {
        for link in &extract.links {
            let Ok(normalized) = urls::normalize(link.as_str()) else {
                continue;
            };
            if urls::in_scope(&ctx.seed, &normalized) && !urls::has_binary_extension(&normalized) {
                state.admit(normalized, depth + 1);
            }
        }
    }

    let crawled_page = CrawledPage {
        url: url.as_str().to_string(),
        title: extract.title,
        description: extract.description,
        headings: extract.headings,
        category,
        relevance,
        depth,
        content_hash: hash,
        in_sitemap,
    };
    let progress = ctx.progress_locked(state);
    (crawled_page, progress)
}

async fn skip(ctx: &Arc<CrawlContext>, url: &Url, depth: u32) {
    {
        let mut state = ctx.state.lock().unwrap();
        state.skipped += 1;
        debug!(url = %url, depth, skipped = state.skipped, "page skipped");
    }
    ctx.emit_progress().await;
}
