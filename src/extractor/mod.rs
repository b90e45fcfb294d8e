//! HTML metadata extraction.
//!
//! Parses a fetched page into the fields the categorizer and change tracker
//! work from. Title precedence: `og:title`, then `<title>`, then the first
//! `<h1>`. Description precedence: `meta[name=description]`, then
//! `og:description`, then the first substantial paragraph.

use scraper::{Html, Selector};
use url::Url;

/// Longest description taken from a paragraph fallback.
const MAX_DESCRIPTION_LEN: usize = 240;
/// A paragraph must be at least this long to serve as a description.
const MIN_PARAGRAPH_LEN: usize = 50;
/// Cap on collected headings.
const MAX_HEADINGS: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct PageExtract {
    pub title: Option<String>,
    pub description: Option<String>,
    pub headings: Vec<String>,
    pub canonical: Option<String>,
    pub links: Vec<Url>,
}

pub fn extract(html: &str, base_url: &Url) -> PageExtract {
    let document = Html::parse_document(html);

    PageExtract {
        title: extract_title(&document),
        description: extract_description(&document),
        headings: extract_headings(&document),
        canonical: extract_canonical(&document),
        links: extract_links(&document, base_url),
    }
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .find_map(|element| element.value().attr("content"))
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
}

fn extract_title(document: &Html) -> Option<String> {
    if let Some(og_title) = meta_content(document, "meta[property='og:title']") {
        return Some(og_title);
    }

    if let Ok(selector) = Selector::parse("title")
        && let Some(element) = document.select(&selector).next()
    {
        let title = element.text().collect::<String>().trim().to_string();
        if !title.is_empty() {
            return Some(title);
        }
    }

    let h1 = Selector::parse("h1").ok()?;
    document
        .select(&h1)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .find(|text| !text.is_empty())
}

fn extract_description(document: &Html) -> Option<String> {
    if let Some(description) = meta_content(document, "meta[name='description']") {
        return Some(description);
    }
    if let Some(og_description) = meta_content(document, "meta[property='og:description']") {
        return Some(og_description);
    }

    let p = Selector::parse("p").ok()?;
    document
        .select(&p)
        .map(|element| {
            element
                .text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .find(|text| text.len() >= MIN_PARAGRAPH_LEN)
        .map(|text| truncate_chars(&text, MAX_DESCRIPTION_LEN))
}

fn extract_headings(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("h1, h2, h3") else {
        return Vec::new();
    };

    let mut headings = Vec::new();
    for element in document.select(&selector) {
        let text = element.text().collect::<String>().trim().to_string();
        if !text.is_empty() && !headings.contains(&text) {
            headings.push(text);
        }
        if headings.len() >= MAX_HEADINGS {
            break;
        }
    }
    headings
}

fn extract_canonical(document: &Html) -> Option<String> {
    let selector = Selector::parse("link[rel='canonical']").ok()?;
    document
        .select(&selector)
        .find_map(|element| element.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<Url> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| base_url.join(href).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/docs/").unwrap()
    }

    #[test]
    fn og_title_takes_precedence() {
        let html = r#"<html><head>
            <meta property="og:title" content="OG Title">
            <title>Doc Title</title>
            </head><body><h1>H1 Title</h1></body></html>"#;
        let extract = extract(html, &base());
        assert_eq!(extract.title.as_deref(), Some("OG Title"));
    }

    #[test]
    fn title_falls_back_to_tag_then_h1() {
        let with_title = "<html><head><title>Doc Title</title></head><body><h1>H1</h1></body></html>";
        assert_eq!(
            extract(with_title, &base()).title.as_deref(),
            Some("Doc Title")
        );

        let h1_only = "<html><body><h1>Only Heading</h1></body></html>";
        assert_eq!(
            extract(h1_only, &base()).title.as_deref(),
            Some("Only Heading")
        );
    }

    #[test]
    fn meta_description_beats_og_description() {
        let html = r#"<html><head>
            <meta property="og:description" content="og desc">
            <meta name="description" content="meta desc">
            </head><body></body></html>"#;
        assert_eq!(
            extract(html, &base()).description.as_deref(),
            Some("meta desc")
        );
    }

    #[test]
    fn paragraph_fallback_requires_length_and_truncates() {
        let short = "<html><body><p>too short</p></body></html>";
        assert!(extract(short, &base()).description.is_none());

        let long_text = "word ".repeat(100);
        let html = format!("<html><body><p>{long_text}</p></body></html>");
        let description = extract(&html, &base()).description.unwrap();
        assert!(description.chars().count() <= 240);
    }

    #[test]
    fn headings_are_ordered_trimmed_and_deduplicated() {
        let html = r#"<html><body>
            <h1> Intro </h1>
            <h2>Setup</h2>
            <h3>Setup</h3>
            <h2>Usage</h2>
            </body></html>"#;
        let extract = extract(html, &base());
        assert_eq!(extract.headings, vec!["Intro", "Setup", "Usage"]);
    }

    #[test]
    fn links_resolve_relative_and_drop_non_http() {
        let html = r#"<html><body>
            <a href="/guide">guide</a>
            <a href="page">relative</a>
            <a href="mailto:x@example.com">mail</a>
            <a href="tel:+15551234">tel</a>
            <a href="javascript:void(0)">js</a>
            <a href="https://other.org/abs">abs</a>
            </body></html>"#;
        let links = extract(html, &base()).links;
        let as_strings: Vec<_> = links.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            as_strings,
            vec![
                "https://example.com/guide",
                "https://example.com/docs/page",
                "https://other.org/abs",
            ]
        );
    }

    #[test]
    fn canonical_link_is_extracted() {
        let html = r#"<html><head><link rel="canonical" href="https://example.com/docs"></head></html>"#;
        assert_eq!(
            extract(html, &base()).canonical.as_deref(),
            Some("https://example.com/docs")
        );
    }
}
