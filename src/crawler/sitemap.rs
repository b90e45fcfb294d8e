//! sitemap.xml seeding.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use url::Url;

static LOC_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"<loc>\s*([^<]+?)\s*</loc>").unwrap());

/// Fetch the seed host's sitemap.xml and return the listed URLs, capped at
/// `limit`. Missing or malformed sitemaps yield an empty list.
pub async fn fetch_sitemap_urls(client: &Client, seed: &Url, limit: usize) -> Vec<Url> {
    let Some(host) = seed.host_str() else {
        return Vec::new();
    };
    let port = seed
        .port()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    let sitemap_url = format!("{}://{}{}/sitemap.xml", seed.scheme(), host, port);

    let response = match client.get(&sitemap_url).send().await {
        Ok(response) if response.status().is_success() => response,
        _ => return Vec::new(),
    };

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .unwrap_or("");
    if !content_type.contains("xml") {
        return Vec::new();
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(_) => return Vec::new(),
    };

    parse_locs(&body, limit)
}

fn parse_locs(body: &str, limit: usize) -> Vec<Url> {
    LOC_REGEX
        .captures_iter(body)
        .filter_map(|captures| Url::parse(captures[1].trim()).ok())
        .take(limit)
        .collect()
}
