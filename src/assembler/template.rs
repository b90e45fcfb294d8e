//! Deterministic markdown assembler.

use async_trait::async_trait;

use crate::assembler::Assembler;
use crate::entities::{Page, Site};

/// Pages scoring below this land in the trailing `Optional` section.
const OPTIONAL_THRESHOLD: f64 = 0.3;

/// Section emission order.
const SECTION_ORDER: &[&str] = &[
    "Getting Started",
    "Documentation",
    "API Reference",
    "Guides",
    "Examples",
    "Core Pages",
    "FAQ",
    "Changelog",
    "About",
    "Blog",
    "Other",
];

pub struct TemplateAssembler;

#[async_trait]
impl Assembler for TemplateAssembler {
    async fn assemble(&self, site: &Site, pages: &[Page]) -> anyhow::Result<String> {
        Ok(render(site, pages))
    }
}

pub fn render(site: &Site, pages: &[Page]) -> String {
    let mut lines: Vec<String> = Vec::new();

    let title = site.title.as_deref().unwrap_or(&site.domain);
    lines.push(format!("# {title}"));
    if let Some(description) = &site.description {
        lines.push(String::new());
        lines.push(format!("> {description}"));
    }
    lines.push(String::new());

    let mut sorted: Vec<&Page> = pages.iter().collect();
    sorted.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.url.cmp(&b.url))
    });

    let mut by_section: std::collections::HashMap<&str, Vec<&Page>> =
        std::collections::HashMap::new();
    let mut optional: Vec<&Page> = Vec::new();
    let mut seen_urls: std::collections::HashSet<&str> = std::collections::HashSet::new();

    for page in sorted {
        if !seen_urls.insert(page.url.as_str()) {
            continue;
        }
        if page.relevance_score < OPTIONAL_THRESHOLD {
            optional.push(page);
        } else {
            by_section.entry(page.category.as_str()).or_default().push(page);
        }
    }

    for section in SECTION_ORDER {
        let Some(section_pages) = by_section.get(section) else {
            continue;
        };
        lines.push(format!("## {section}"));
        lines.push(String::new());
        for page in section_pages {
            lines.push(bullet(page));
        }
        lines.push(String::new());
    }

    if !optional.is_empty() {
        lines.push("## Optional".to_string());
        lines.push(String::new());
        for page in &optional {
            lines.push(bullet(page));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn bullet(page: &Page) -> String {
    let label = page.title.as_deref().unwrap_or(&page.url);
    // Parentheses would break the markdown link target.
    let safe_url = page.url.replace('(', "%28").replace(')', "%29");
    match &page.description {
        Some(description) => format!("- [{label}]({safe_url}): {description}"),
        None => format!("- [{label}]({safe_url})"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sqlx::types::Json;

    use super::*;
    use crate::entities::PageStatus;

    fn site() -> Site {
        Site {
            id: 1,
            url: "https://example.com/".to_string(),
            domain: "example.com".to_string(),
            title: Some("Example".to_string()),
            description: Some("An example site".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn page(url: &str, title: &str, category: &str, relevance: f64) -> Page {
        Page {
            id: 0,
            site_id: 1,
            crawl_job_id: 1,
            url: url.to_string(),
            title: Some(title.to_string()),
            description: None,
            headings: Json(vec![]),
            category: category.to_string(),
            relevance_score: relevance,
            depth: 0,
            content_hash: "h".to_string(),
            status: PageStatus::Added,
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
        }
    }

    #[test]
    fn renders_header_and_sections_in_order() {
        let pages = vec![
            page("https://example.com/blog/x", "Post", "Blog", 0.4),
            page("https://example.com/docs", "Docs", "Documentation", 0.9),
            page("https://example.com/", "Home", "Core Pages", 0.7),
        ];
        let output = render(&site(), &pages);

        assert!(output.starts_with("# Example\n\n> An example site\n"));
        let docs_at = output.find("## Documentation").unwrap();
        let core_at = output.find("## Core Pages").unwrap();
        let blog_at = output.find("## Blog").unwrap();
        assert!(docs_at < core_at && core_at < blog_at);
    }

    #[test]
    fn low_relevance_pages_go_to_optional() {
        let pages = vec![
            page("https://example.com/docs", "Docs", "Documentation", 0.9),
            page("https://example.com/misc", "Misc", "Other", 0.1),
        ];
        let output = render(&site(), &pages);
        let optional_at = output.find("## Optional").unwrap();
        assert!(output.find("Misc").unwrap() > optional_at);
    }

    #[test]
    fn duplicate_urls_render_once() {
        let pages = vec![
            page("https://example.com/docs", "Docs", "Documentation", 0.9),
            page("https://example.com/docs", "Docs again", "Documentation", 0.8),
        ];
        let output = render(&site(), &pages);
        assert_eq!(output.matches("https://example.com/docs").count(), 1);
    }

    #[test]
    fn parentheses_in_urls_are_escaped() {
        let pages = vec![page(
            "https://example.com/docs/tuple_(type)",
            "Tuples",
            "Documentation",
            0.9,
        )];
        let output = render(&site(), &pages);
        assert!(output.contains("https://example.com/docs/tuple_%28type%29"));
    }

    #[test]
    fn output_is_deterministic() {
        let pages = vec![
            page("https://example.com/a", "A", "Documentation", 0.9),
            page("https://example.com/b", "B", "Documentation", 0.9),
        ];
        assert_eq!(render(&site(), &pages), render(&site(), &pages));
    }
}
