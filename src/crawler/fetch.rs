//! HTTP fetching for the crawler.
//!
//! One shared client per process: stable user agent, 20s read timeout, at
//! most 5 redirects. Server errors and network faults are retried locally
//! with short fixed delays before the page is given up on.

use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder, StatusCode};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

const USER_AGENT: &str = "LlmsTxtBot/0.1 (+https://github.com/llmstxt/llmstxt)";
const READ_TIMEOUT: Duration = Duration::from_secs(20);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REDIRECTS: usize = 5;
const MAX_BODY_SIZE: u64 = 5 * 1024 * 1024; // 5MB

/// Delays between local retries of a transient fetch fault.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(READ_TIMEOUT)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .expect("Failed to build HTTP client")
});

pub fn client() -> Client {
    HTTP_CLIENT.clone()
}

/// Stable crawler identity, also matched against robots.txt agent rules.
pub fn user_agent() -> &'static str {
    USER_AGENT
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timeout")]
    Timeout,

    #[error("connection error: {0}")]
    Connect(String),

    #[error("too many redirects")]
    RedirectLoop,

    #[error("http status {status}")]
    Http {
        status: StatusCode,
        retriable: bool,
    },

    #[error("non-html content-type: {0}")]
    NotHtml(String),

    #[error("body too large ({0} bytes)")]
    BodyTooLarge(u64),

    #[error("redirected off the allowed domain: {0}")]
    OffDomain(String),

    #[error("io error: {0}")]
    Io(String),
}

impl FetchError {
    /// Transient faults worth a local retry: 5xx, timeouts, network errors.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Http { retriable, .. } => *retriable,
            Self::Timeout | Self::Connect(_) | Self::Io(_) => true,
            Self::RedirectLoop | Self::NotHtml(_) | Self::BodyTooLarge(_) | Self::OffDomain(_) => {
                false
            }
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_redirect() {
            Self::RedirectLoop
        } else if err.is_connect() || err.is_request() {
            Self::Connect(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

/// A successfully fetched HTML page.
#[derive(Debug)]
pub struct FetchedPage {
    pub final_url: Url,
    pub status: StatusCode,
    pub body: String,
}

/// Fetch one HTML page, without retries.
#[instrument(skip_all, fields(url = %url))]
pub async fn fetch_html(client: &Client, url: &Url) -> Result<FetchedPage, FetchError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(FetchError::from_reqwest)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http {
            status,
            retriable: status.is_server_error(),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.trim_start().starts_with("text/html") {
        return Err(FetchError::NotHtml(
            content_type.split(';').next().unwrap_or("").trim().to_string(),
        ));
    }

    if let Some(length) = response.content_length()
        && length > MAX_BODY_SIZE
    {
        return Err(FetchError::BodyTooLarge(length));
    }

    let final_url = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|e| FetchError::Io(e.to_string()))?;
    if body.len() as u64 > MAX_BODY_SIZE {
        return Err(FetchError::BodyTooLarge(body.len() as u64));
    }

    Ok(FetchedPage {
        final_url,
        status,
        body,
    })
}

/// Fetch with local retries for transient faults (1s, 2s, 4s).
pub async fn fetch_html_with_retry(client: &Client, url: &Url) -> Result<FetchedPage, FetchError> {
    let mut last_err = None;
    for (attempt, delay) in std::iter::once(None)
        .chain(RETRY_DELAYS.iter().map(Some))
        .enumerate()
    {
        if let Some(delay) = delay {
            tokio::time::sleep(*delay).await;
        }
        match fetch_html(client, url).await {
            Ok(page) => return Ok(page),
            Err(err) if err.should_retry() => {
                debug!(attempt, error = %err, "transient fetch error");
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.expect("retry loop records an error before exhausting"))
}
