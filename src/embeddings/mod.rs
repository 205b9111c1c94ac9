//! Embedding provider seam.
//!
//! The index builder and query engine both embed text through the
//! [`EmbeddingProvider`] trait so tests can substitute a deterministic
//! in-process implementation. The production implementation calls the
//! OpenAI Embeddings API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::EmbeddingError;

/// Converts batches of text into fixed-dimension vectors.
///
/// The same provider and model must be used at index-build time and query
/// time; [`crate::query::QueryEngine::new`] enforces this by comparing
/// `model()` against the model recorded in the index.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the embedding model this provider calls.
    fn model(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// OpenAI Embeddings API provider.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedding {
    model: String,
    api_key: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedding {
    /// Create a provider for the given model.
    pub fn new(model: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
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
impl EmbeddingProvider for OpenAiEmbedding {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        log::debug!(
            "OpenAI embed (model={}): {} inputs",
            self.model,
            texts.len()
        );

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Upstream(format!(
                "embeddings API returned {}: {}",
                status,
                truncate(&detail, 500)
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Upstream(format!("invalid embeddings body: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::Upstream(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The API tags each datum with its input index; order by it rather
        // than trusting response order.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Truncate to a character boundary for error messages.
fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
