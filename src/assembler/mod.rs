//! Document assembly: turn the categorized pages of a crawl into llms.txt
//! markdown.
//!
//! The core is polymorphic over the assembler: the deterministic template
//! variant is the default, and an OpenAI-compatible LLM variant is enabled
//! by configuring an API key.

pub mod llm;
pub mod template;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::entities::{Page, Site};

#[async_trait]
pub trait Assembler: Send + Sync {
    /// Produce the llms.txt markdown for a site from its crawled pages.
    async fn assemble(&self, site: &Site, pages: &[Page]) -> anyhow::Result<String>;
}

/// Pick the assembler variant for this deployment.
pub fn from_config(config: &Config) -> Arc<dyn Assembler> {
    if config.llm_enabled() {
        Arc::new(llm::LlmAssembler::new(
            config.llm_api_key.clone(),
            config.llm_model.clone(),
        ))
    } else {
        Arc::new(template::TemplateAssembler)
    }
}
