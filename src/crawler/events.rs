//! Events emitted by a running crawl, in page-completion order.

use serde::Serialize;

use crate::categorizer::Category;

/// A page that finished fetch + extraction + categorization.
#[derive(Debug, Clone, Serialize)]
pub struct CrawledPage {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub headings: Vec<String>,
    pub category: Category,
    pub relevance: f64,
    pub depth: u32,
    pub content_hash: String,
    pub in_sitemap: bool,
}

/// Counter snapshot. All counters are monotonically non-decreasing within a
/// run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlProgress {
    pub found: u64,
    pub crawled: u64,
    pub changed: u64,
    pub skipped: u64,
    pub max_pages: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlEvent {
    PageCrawled(CrawledPage),
    Progress(CrawlProgress),
    Completed,
    Failed { error: String },
}
