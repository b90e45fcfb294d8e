//! LLM-backed assembler using an OpenAI-compatible chat completion API.
//!
//! Any failure of the LLM call (network, non-2xx, unparseable envelope,
//! empty content) falls back to the deterministic template rendering rather
//! than failing the crawl.

use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assembler::{Assembler, template};
use crate::entities::{Page, Site};

const API_BASE: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const SYSTEM_PROMPT: &str = "You are generating an llms.txt file: a concise markdown document \
that describes a website for LLM consumers. Keep the given section structure and links, tighten \
the wording, and do not invent pages that are not listed. Respond with markdown only.";

pub struct LlmAssembler {
    client: Client,
    api_key: String,
    model: String,
}

impl LlmAssembler {
    pub fn new(api_key: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build LLM HTTP client");
        Self {
            client,
            api_key,
            model,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl Assembler for LlmAssembler {
    async fn assemble(&self, site: &Site, pages: &[Page]) -> anyhow::Result<String> {
        // The deterministic rendering doubles as the prompt payload: the
        // model rewrites it rather than working from raw page rows.
        let draft = template::render(site, pages);

        match self.generate(site, pages, &draft).await {
            Ok(markdown) => {
                info!(model = %self.model, "LLM assembler produced document");
                Ok(markdown)
            }
            Err(e) => {
                warn!(model = %self.model, "LLM assembler failed, using template output: {e:#}");
                Ok(draft)
            }
        }
    }
}

impl LlmAssembler {
    async fn generate(&self, site: &Site, pages: &[Page], draft: &str) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "Site: {}\nPages crawled: {}\n\nDraft llms.txt:\n\n{}",
                        site.url,
                        pages.len(),
                        draft
                    ),
                },
            ],
            temperature: 0.2,
        };

        let response = self
            .client
            .post(format!("{API_BASE}/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("LLM request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("LLM request returned {status}: {body}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("LLM response was not valid JSON")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty());

        match content {
            Some(markdown) => Ok(markdown),
            None => bail!("LLM response contained no content"),
        }
    }
}
