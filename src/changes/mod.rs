//! Content hashing and change classification between crawl runs.
//!
//! The hash covers the canonicalized extraction tuple, not the raw HTML, so
//! boilerplate drift (nav churn, timestamps in footers) does not register as
//! a change.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::entities::PageStatus;

/// Field separator inside the hashed tuple. Keeps `("ab", "c")` and
/// `("a", "bc")` from colliding.
const FIELD_SEPARATOR: char = '\u{1f}';

/// SHA-256 over `(title, description, headings)`. Absent fields hash as the
/// empty string.
pub fn content_hash(title: Option<&str>, description: Option<&str>, headings: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.unwrap_or("").as_bytes());
    hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
    hasher.update(description.unwrap_or("").as_bytes());
    hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
    hasher.update(headings.join("\n").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 over an assembled document.
pub fn document_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Classify a crawled page against the prior successful crawl's hashes.
pub fn classify(prior_hashes: &HashMap<String, String>, url: &str, hash: &str) -> PageStatus {
    match prior_hashes.get(url) {
        None => PageStatus::Added,
        Some(prior) if prior == hash => PageStatus::Unchanged,
        Some(_) => PageStatus::Updated,
    }
}

/// URLs present in the prior crawl but absent from this one.
pub fn removed_urls<'a>(
    prior_hashes: &'a HashMap<String, String>,
    seen: &HashSet<String>,
) -> Vec<&'a str> {
    let mut removed: Vec<&str> = prior_hashes
        .keys()
        .filter(|url| !seen.contains(*url))
        .map(String::as_str)
        .collect();
    removed.sort_unstable();
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_equality_matches_tuple_equality() {
        let a = content_hash(Some("T"), Some("D"), &["H1".into(), "H2".into()]);
        let b = content_hash(Some("T"), Some("D"), &["H1".into(), "H2".into()]);
        assert_eq!(a, b);

        let different_title = content_hash(Some("T2"), Some("D"), &["H1".into(), "H2".into()]);
        let different_headings = content_hash(Some("T"), Some("D"), &["H1".into()]);
        assert_ne!(a, different_title);
        assert_ne!(a, different_headings);
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        let a = content_hash(Some("ab"), Some("c"), &[]);
        let b = content_hash(Some("a"), Some("bc"), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn classify_against_prior_run() {
        let mut prior = HashMap::new();
        prior.insert("https://example.com/a".to_string(), "hash-a".to_string());
        prior.insert("https://example.com/b".to_string(), "hash-b".to_string());

        assert_eq!(
            classify(&prior, "https://example.com/a", "hash-a"),
            PageStatus::Unchanged
        );
        assert_eq!(
            classify(&prior, "https://example.com/b", "hash-b2"),
            PageStatus::Updated
        );
        assert_eq!(
            classify(&prior, "https://example.com/new", "hash-n"),
            PageStatus::Added
        );
    }

    #[test]
    fn removed_urls_are_prior_minus_seen() {
        let mut prior = HashMap::new();
        prior.insert("https://example.com/a".to_string(), "h".to_string());
        prior.insert("https://example.com/gone".to_string(), "h".to_string());

        let mut seen = HashSet::new();
        seen.insert("https://example.com/a".to_string());

        assert_eq!(removed_urls(&prior, &seen), vec!["https://example.com/gone"]);
    }
}
