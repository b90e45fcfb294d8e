//! Page categorization and relevance scoring.
//!
//! Categories come from case-insensitive path fragments with a fixed priority
//! order; the relevance score is a deterministic linear combination of the
//! category weight, crawl depth, path length, and sitemap presence.

use serde::Serialize;
use url::Url;

use crate::crawler::urls::path_segments;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    GettingStarted,
    Documentation,
    ApiReference,
    Guides,
    Examples,
    Faq,
    Blog,
    Changelog,
    About,
    CorePages,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GettingStarted => "Getting Started",
            Self::Documentation => "Documentation",
            Self::ApiReference => "API Reference",
            Self::Guides => "Guides",
            Self::Examples => "Examples",
            Self::Faq => "FAQ",
            Self::Blog => "Blog",
            Self::Changelog => "Changelog",
            Self::About => "About",
            Self::CorePages => "Core Pages",
            Self::Other => "Other",
        }
    }

    /// Weight used by the relevance formula.
    pub fn weight(&self) -> f64 {
        match self {
            Self::ApiReference => 1.0,
            Self::Documentation => 0.9,
            Self::Guides => 0.85,
            Self::GettingStarted => 0.85,
            Self::Examples => 0.75,
            Self::Faq => 0.7,
            Self::CorePages => 0.7,
            Self::Changelog => 0.5,
            Self::About => 0.4,
            Self::Blog => 0.4,
            Self::Other => 0.2,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "Getting Started" => Self::GettingStarted,
            "Documentation" => Self::Documentation,
            "API Reference" => Self::ApiReference,
            "Guides" => Self::Guides,
            "Examples" => Self::Examples,
            "FAQ" => Self::Faq,
            "Blog" => Self::Blog,
            "Changelog" => Self::Changelog,
            "About" => Self::About,
            "Core Pages" => Self::CorePages,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path fragments per category, checked in priority order.
const CATEGORY_FRAGMENTS: &[(Category, &[&str])] = &[
    (Category::ApiReference, &["/api", "/reference"]),
    (Category::Documentation, &["/docs", "/documentation", "/manual"]),
    (Category::Guides, &["/guide", "/tutorial", "/how-to", "/howto"]),
    (Category::Examples, &["/example", "/demo", "/sample"]),
    (Category::Faq, &["/faq"]),
    (Category::Blog, &["/blog", "/news", "/post"]),
    (Category::Changelog, &["/changelog", "/release", "/whats-new"]),
    (
        Category::GettingStarted,
        &["/getting-started", "/getting_started", "/quickstart", "/quick-start", "/install", "/setup", "/start"],
    ),
    (Category::About, &["/about", "/team", "/contact", "/company"]),
];

/// Assign a category from the URL path. The seed and other near-root pages
/// fall back to `Core Pages` when no fragment matches.
pub fn categorize(url: &Url) -> Category {
    let path = url.path().to_lowercase();
    for (category, fragments) in CATEGORY_FRAGMENTS {
        if fragments.iter().any(|fragment| path.contains(fragment)) {
            return *category;
        }
    }
    if path_segments(url) <= 1 {
        Category::CorePages
    } else {
        Category::Other
    }
}

/// Relevance score in [0, 1]:
/// 40% category weight, 20% depth, 20% path length, 20% sitemap presence.
pub fn relevance(url: &Url, depth: u32, category: Category, in_sitemap: bool) -> f64 {
    let depth_term = 1.0 - (depth.min(5) as f64) / 5.0;
    let segments_term = 1.0 - (path_segments(url).min(6) as f64) / 6.0;
    let sitemap_term = if in_sitemap { 1.0 } else { 0.0 };

    let score = 0.40 * category.weight() + 0.20 * depth_term + 0.20 * segments_term
        + 0.20 * sitemap_term;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://example.com{path}")).unwrap()
    }

    #[test]
    fn api_reference_outranks_documentation() {
        assert_eq!(categorize(&url("/docs/api/client")), Category::ApiReference);
        assert_eq!(categorize(&url("/docs/usage")), Category::Documentation);
    }

    #[test]
    fn fragment_matching_is_case_insensitive() {
        assert_eq!(categorize(&url("/Docs/Intro")), Category::Documentation);
        assert_eq!(categorize(&url("/BLOG/2026")), Category::Blog);
    }

    #[test]
    fn near_root_pages_default_to_core() {
        assert_eq!(categorize(&url("/")), Category::CorePages);
        assert_eq!(categorize(&url("/pricing")), Category::CorePages);
        assert_eq!(categorize(&url("/some/deep/page")), Category::Other);
    }

    #[test]
    fn stronger_signal_beats_core_default() {
        assert_eq!(categorize(&url("/faq")), Category::Faq);
        assert_eq!(categorize(&url("/install")), Category::GettingStarted);
    }

    #[test]
    fn relevance_matches_formula() {
        // API Reference at depth 1, 2 segments, in sitemap:
        // 0.40*1.0 + 0.20*(1 - 1/5) + 0.20*(1 - 2/6) + 0.20*1.0
        let u = url("/api/client");
        let score = relevance(&u, 1, Category::ApiReference, true);
        let expected = 0.40 + 0.20 * 0.8 + 0.20 * (2.0 / 3.0) + 0.20;
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn relevance_saturates_depth_and_segments() {
        let deep = url("/a/b/c/d/e/f/g/h");
        let score = relevance(&deep, 12, Category::Other, false);
        let expected = 0.40 * 0.2;
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn relevance_is_within_unit_interval() {
        for depth in 0..8 {
            for category in [Category::ApiReference, Category::Other, Category::Blog] {
                let score = relevance(&url("/docs/a/b"), depth, category, depth % 2 == 0);
                assert!((0.0..=1.0).contains(&score));
            }
        }
    }

    #[test]
    fn category_names_round_trip() {
        for category in [
            Category::GettingStarted,
            Category::Documentation,
            Category::ApiReference,
            Category::Guides,
            Category::Examples,
            Category::Faq,
            Category::Blog,
            Category::Changelog,
            Category::About,
            Category::CorePages,
            Category::Other,
        ] {
            assert_eq!(Category::from_name(category.as_str()), category);
        }
    }
}
