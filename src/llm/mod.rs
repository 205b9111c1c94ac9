//! Chat-completion provider seam.
//!
//! Response synthesis goes through the [`ChatModel`] trait; the production
//! implementation calls the OpenAI Chat Completions API with a single user
//! message per synthesis pass. No automatic retries: a failed upstream call
//! surfaces to the request that triggered it.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::LlmError;

/// A hosted chat model that turns one prompt into one completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifier of the chat model.
    fn model(&self) -> &str;

    /// Synthesize a completion for the prompt.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// OpenAI Chat Completions API provider.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: usize,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiChat {
    /// Create a provider for the given model.
    ///
    /// `max_tokens` caps the completion length and matches the output
    /// reservation the prompt helper budgets against.
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        max_tokens: usize,
        timeout_secs: u64,
    ) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens,
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }

    /// Override the API base URL (tests, proxies, compatible providers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        log::debug!(
            "OpenAI chat completion (model={}): {} prompt chars",
            self.model,
            prompt.len()
        );

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": self.max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Upstream(format!(
                "chat API returned {}: {}",
                status,
                truncate(&detail, 500)
            )));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Upstream(format!("invalid chat body: {}", e)))?;

        parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| LlmError::Upstream("chat response missing message content".to_string()))
    }
}

/// Truncate to a character boundary for error messages.
fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
