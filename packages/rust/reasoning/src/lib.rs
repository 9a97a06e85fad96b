//! Reasoning model boundary for BuildLens.
//!
//! The pipeline hands a rendered context document to a [`ReasoningClient`]
//! and gets analysis text back. [`OpenRouterClient`] is the production
//! implementation; [`StaticReasoning`] is a canned test double.

pub mod prompt;

pub use prompt::render_context;

use async_trait::async_trait;
use serde_json::json;

use buildlens_shared::config::USER_AGENT;
use buildlens_shared::error::{BuildLensError, Result};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Instructions sent as the system message. Deliberately minimal: the
/// context document carries the substance.
const SYSTEM_PROMPT: &str = "You are an experienced Path of Exile 2 player. \
Analyze the build data you are given: summarize the build's plan, call out \
strengths and weaknesses, and suggest concrete improvements. Ground every \
point in the provided data.";

/// External reasoning model boundary.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Analyze a rendered context document with the given model.
    async fn analyze(&self, context_document: &str, model: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OpenRouter
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat-completions client pointed at OpenRouter.
pub struct OpenRouterClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, OPENROUTER_BASE_URL)
    }

    /// Point the client at a different endpoint (tests).
    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| BuildLensError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ReasoningClient for OpenRouterClient {
    async fn analyze(&self, context_document: &str, model: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": context_document },
            ],
            "stream": false,
        });

        tracing::debug!(%model, document_len = context_document.len(), "requesting analysis");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| BuildLensError::Reasoning(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(BuildLensError::Reasoning(format!(
                "HTTP {status}: {error_body}"
            )));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BuildLensError::Reasoning(format!("response decode: {e}")))?;

        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| BuildLensError::Reasoning("response had no message content".into()))
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Returns a fixed analysis; used by pipeline tests.
pub struct StaticReasoning(pub String);

#[async_trait]
impl ReasoningClient for StaticReasoning {
    async fn analyze(&self, _context_document: &str, _model: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}
