//! URL normalization and crawl scope policy.

use thiserror::Error;
use url::Url;

/// Query parameters stripped during normalization.
const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid", "mc_eid"];

/// File extensions that are never HTML; filtered before fetch.
const SKIP_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".pdf", ".zip", ".tar", ".gz",
    ".mp4", ".mp3", ".wav", ".css", ".js", ".woff", ".woff2", ".ttf", ".eot",
];

/// Path fragments that lead to auth/admin surfaces; not worth fetching.
const SKIP_PATH_SEGMENTS: &[&str] = &["/login", "/signin", "/signup", "/register", "/admin"];

#[derive(Error, Debug)]
pub enum UrlError {
    #[error("invalid url: {0}")]
    Parse(#[from] url::ParseError),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("url has no host")]
    MissingHost,
}

/// Normalize a URL so that equivalent spellings compare equal:
/// lowercase scheme and host, default port stripped, fragment stripped,
/// trailing slash removed except on the root path, query keys sorted, and
/// tracking parameters dropped. The operation is idempotent.
pub fn normalize(raw: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(raw.trim())?;

    // Url::parse already lowercases scheme and host and strips default ports.
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    url.set_fragment(None);

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));

        if params.is_empty() {
            url.set_query(None);
        } else {
            let query = params
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{k}={v}")
                    }
                })
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query));
        }
    }

    Ok(url)
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Registrable-domain scope check: a candidate host is in scope when it equals
/// the seed host or is a subdomain of it, ignoring a `www.` prefix on either
/// side. Keeps `docs.example.com` reachable from `example.com` without
/// wandering off-site.
pub fn in_scope(seed: &Url, candidate: &Url) -> bool {
    let (Some(seed_host), Some(candidate_host)) = (seed.host_str(), candidate.host_str()) else {
        return false;
    };
    let seed_core = seed_host.strip_prefix("www.").unwrap_or(seed_host);
    let candidate_core = candidate_host
        .strip_prefix("www.")
        .unwrap_or(candidate_host);

    candidate_core == seed_core || candidate_core.ends_with(&format!(".{seed_core}"))
}

/// Admission filter: URLs that are never HTML are dropped before they enter
/// the frontier.
pub fn has_binary_extension(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Auth/admin surfaces. Checked at fetch time so the skip is counted, like a
/// robots denial.
pub fn is_auth_path(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    SKIP_PATH_SEGMENTS.iter().any(|seg| path.contains(seg))
}

/// Number of non-empty path segments.
pub fn path_segments(url: &Url) -> usize {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host() {
        let url = normalize("HTTPS://Example.COM/Docs").unwrap();
        assert_eq!(url.as_str(), "https://example.com/Docs");
    }

    #[test]
    fn strips_default_port() {
        let url = normalize("https://example.com:443/docs").unwrap();
        assert_eq!(url.as_str(), "https://example.com/docs");
    }

    #[test]
    fn keeps_non_default_port() {
        let url = normalize("http://example.com:8080/docs").unwrap();
        assert_eq!(url.as_str(), "http://example.com:8080/docs");
    }

    #[test]
    fn strips_fragment() {
        let url = normalize("https://example.com/docs#install").unwrap();
        assert_eq!(url.as_str(), "https://example.com/docs");
    }

    #[test]
    fn strips_trailing_slash_except_root() {
        assert_eq!(
            normalize("https://example.com/docs/").unwrap().as_str(),
            "https://example.com/docs"
        );
        assert_eq!(
            normalize("https://example.com/").unwrap().as_str(),
            "https://example.com/"
        );
    }

    #[test]
    fn sorts_query_keys() {
        let url = normalize("https://example.com/p?b=2&a=1").unwrap();
        assert_eq!(url.as_str(), "https://example.com/p?a=1&b=2");
    }

    #[test]
    fn drops_tracking_params() {
        let url = normalize("https://example.com/p?utm_source=x&gclid=1&q=rust").unwrap();
        assert_eq!(url.as_str(), "https://example.com/p?q=rust");
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            normalize("mailto:hi@example.com"),
            Err(UrlError::UnsupportedScheme(_))
        ));
        assert!(normalize("ftp://example.com/file").is_err());
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "HTTPS://Example.COM:443/Docs/?b=2&a=1&utm_medium=email#frag",
            "http://example.com/",
            "https://example.com/a/b?x=1",
        ] {
            let once = normalize(raw).unwrap();
            let twice = normalize(once.as_str()).unwrap();
            assert_eq!(once, twice, "normalize must be idempotent for {raw}");
        }
    }

    #[test]
    fn scope_allows_subdomains_and_www() {
        let seed = Url::parse("https://www.example.com/").unwrap();
        assert!(in_scope(&seed, &Url::parse("https://example.com/a").unwrap()));
        assert!(in_scope(&seed, &Url::parse("https://docs.example.com/").unwrap()));
        assert!(!in_scope(&seed, &Url::parse("https://example.org/").unwrap()));
        assert!(!in_scope(&seed, &Url::parse("https://notexample.com/").unwrap()));
    }

    #[test]
    fn binary_extensions_are_detected() {
        assert!(has_binary_extension(&Url::parse("https://example.com/a.pdf").unwrap()));
        assert!(has_binary_extension(&Url::parse("https://example.com/img/logo.PNG").unwrap()));
        assert!(!has_binary_extension(&Url::parse("https://example.com/docs").unwrap()));
    }

    #[test]
    fn auth_paths_are_detected() {
        assert!(is_auth_path(&Url::parse("https://example.com/admin/panel").unwrap()));
        assert!(is_auth_path(&Url::parse("https://example.com/login").unwrap()));
        assert!(!is_auth_path(&Url::parse("https://example.com/docs").unwrap()));
    }

    #[test]
    fn counts_path_segments() {
        assert_eq!(path_segments(&Url::parse("https://example.com/").unwrap()), 0);
        assert_eq!(path_segments(&Url::parse("https://example.com/a/b").unwrap()), 2);
    }
}
