//! Query engine: embed, retrieve, pack, synthesize.
//!
//! Response synthesis uses the "compact" strategy: pack as many retrieved
//! chunks as fit the input-token budget into one question-answering call,
//! then refine the answer iteratively across whatever chunks remain instead
//! of issuing one call per chunk.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingProvider;
use crate::error::{EmbeddingError, QueryError};
use crate::index::{ScoredNode, VectorIndex};
use crate::llm::ChatModel;

/// Question-answering template for the first synthesis pass.
pub const TEXT_QA_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
Given the context information and not prior knowledge, \
answer the question: {query_str}\n";

/// Refine template for subsequent passes over remaining chunks.
pub const REFINE_TEMPLATE: &str = "The original question is as follows: {query_str}\n\
We have provided an existing answer: {existing_answer}\n\
We have the opportunity to refine the existing answer \
(only if needed) with some more context below.\n\
------------\n\
{context_msg}\n\
------------\n\
Given the new context, refine the original answer to better answer the question. \
If the context isn't useful, return the original answer.";

/// Separator between chunks packed into one context window.
const CHUNK_SEPARATOR: &str = "\n\n";

/// Snippet length (chars) kept per source in the response.
const SOURCE_SNIPPET_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Prompt helper
// ---------------------------------------------------------------------------

/// Token-budget arithmetic for prompt assembly.
///
/// Token counts are estimated, not tokenized: `max(words, ceil(chars / 4))`
/// over-counts slightly for English and stays safe for dense scripts, which
/// is the right direction for a budget.
#[derive(Debug, Clone, Copy)]
pub struct PromptHelper {
    /// Maximum tokens the model accepts as input.
    pub max_input_tokens: usize,
    /// Tokens reserved for the model's output.
    pub num_output_tokens: usize,
}

impl PromptHelper {
    pub fn new(max_input_tokens: usize, num_output_tokens: usize) -> Self {
        Self {
            max_input_tokens,
            num_output_tokens,
        }
    }

    /// Heuristic token estimate for a text.
    pub fn estimate_tokens(text: &str) -> usize {
        let words = text.split_whitespace().count();
        let chars = text.chars().count();
        words.max(chars.div_ceil(4))
    }

    /// Tokens left for packed context after the template overhead and the
    /// output reservation. `None` means the prompt cannot fit at all.
    pub fn context_budget(&self, template_overhead_tokens: usize) -> Option<usize> {
        self.max_input_tokens
            .checked_sub(self.num_output_tokens)?
            .checked_sub(template_overhead_tokens)
            .filter(|budget| *budget > 0)
    }

    /// Greedily take chunks from the front of `remaining` while they fit
    /// `budget`. Always consumes at least one chunk: if the first chunk
    /// alone exceeds the budget it is truncated (on a char boundary) to
    /// fit. Returns the packed context, or `None` if even an empty slice of
    /// the first chunk would not fit.
    fn pack(&self, remaining: &mut Vec<String>, budget: usize) -> Option<String> {
        if budget == 0 || remaining.is_empty() {
            return None;
        }

        let mut packed: Vec<String> = Vec::new();
        let mut used = 0;
        while let Some(next) = remaining.first() {
            let separator_cost = if packed.is_empty() { 0 } else { 1 };
            let cost = Self::estimate_tokens(next) + separator_cost;
            if used + cost > budget {
                break;
            }
            used += cost;
            packed.push(remaining.remove(0));
        }

        if packed.is_empty() {
            let truncated = truncate_to_tokens(&remaining[0], budget)?;
            remaining.remove(0);
            packed.push(truncated);
        }

        Some(packed.join(CHUNK_SEPARATOR))
    }
}

/// Trim a text to at most `budget` estimated tokens.
fn truncate_to_tokens(text: &str, budget: usize) -> Option<String> {
    if budget == 0 {
        return None;
    }
    let chars: Vec<char> = text.chars().collect();
    let mut len = chars.len().min(budget * 4);
    while len > 0 {
        let candidate: String = chars[..len].iter().collect();
        if PromptHelper::estimate_tokens(&candidate) <= budget {
            return Some(candidate);
        }
        len -= (len / 8).max(1);
    }
    None
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// One retrieved chunk that contributed to the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub node_id: String,
    pub source: String,
    pub score: f32,
    /// Leading snippet of the chunk text.
    pub snippet: String,
}

/// A synthesized answer plus the chunks it drew on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub content: String,
    pub sources: Vec<SourceAttribution>,
}

// ---------------------------------------------------------------------------
// Query engine
// ---------------------------------------------------------------------------

/// Answers queries against a read-only [`VectorIndex`].
///
/// Holds the index, the embedding provider, and the chat model; one engine
/// serves every request for the lifetime of the process.
pub struct QueryEngine {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn ChatModel>,
    helper: PromptHelper,
    top_k: usize,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    /// Create an engine.
    ///
    /// Fails when the provider's embedding model differs from the model the
    /// index was built with: a silent mismatch would degrade retrieval
    /// without any visible error, so it is rejected at construction.
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn ChatModel>,
        helper: PromptHelper,
        top_k: usize,
    ) -> anyhow::Result<Self> {
        if embedder.model() != index.embed_model() {
            anyhow::bail!(
                "embedding model mismatch: index built with '{}', provider is '{}'",
                index.embed_model(),
                embedder.model()
            );
        }
        Ok(Self {
            index,
            embedder,
            llm,
            helper,
            top_k,
        })
    }

    /// Answer a query: embed it, retrieve the top chunks, and synthesize a
    /// response with the compact + refine strategy.
    pub async fn query(&self, text: &str) -> Result<QueryResponse, QueryError> {
        let query_vector = self
            .embedder
            .embed(std::slice::from_ref(&text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Upstream("provider returned no vector".to_string()))?;

        let hits = self.index.retrieve(&query_vector, self.top_k);
        tracing::debug!(hits = hits.len(), "chunks retrieved");

        let mut remaining: Vec<String> = hits.iter().map(|h| h.node.text.clone()).collect();

        // First pass: question-answering template over as much context as fits.
        let qa_overhead =
            PromptHelper::estimate_tokens(&render_qa(text, ""));
        let budget = self
            .helper
            .context_budget(qa_overhead)
            .ok_or(QueryError::PromptTooLarge)?;
        // An empty index retrieval still gets an answer, just without context.
        let context = if remaining.is_empty() {
            String::new()
        } else {
            self.helper
                .pack(&mut remaining, budget)
                .ok_or(QueryError::PromptTooLarge)?
        };

        let mut answer = self.llm.complete(&render_qa(text, &context)).await?;

        // Refine passes over whatever did not fit the first call.
        while !remaining.is_empty() {
            let refine_overhead =
                PromptHelper::estimate_tokens(&render_refine(text, &answer, ""));
            let budget = self
                .helper
                .context_budget(refine_overhead)
                .ok_or(QueryError::PromptTooLarge)?;
            let context = self
                .helper
                .pack(&mut remaining, budget)
                .ok_or(QueryError::PromptTooLarge)?;

            answer = self
                .llm
                .complete(&render_refine(text, &answer, &context))
                .await?;
        }

        Ok(QueryResponse {
            content: answer,
            sources: hits.iter().map(attribution).collect(),
        })
    }
}

fn render_qa(query: &str, context: &str) -> String {
    TEXT_QA_TEMPLATE
        .replace("{context_str}", context)
        .replace("{query_str}", query)
}

fn render_refine(query: &str, existing_answer: &str, context: &str) -> String {
    REFINE_TEMPLATE
        .replace("{query_str}", query)
        .replace("{existing_answer}", existing_answer)
        .replace("{context_msg}", context)
}

fn attribution(hit: &ScoredNode) -> SourceAttribution {
    let snippet = match hit.node.text.char_indices().nth(SOURCE_SNIPPET_CHARS) {
        Some((idx, _)) => hit.node.text[..idx].to_string(),
        None => hit.node.text.clone(),
    };
    SourceAttribution {
        node_id: hit.node.node_id.clone(),
        source: hit.node.source.clone(),
        score: hit.score,
        snippet,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::CountingEmbedder;
    use crate::index::{DirectoryReader, NodeParser};
    use crate::llm::testing::{FailingChat, RecordingChat};

    async fn small_index(texts: &[&str]) -> Arc<VectorIndex> {
        let dir = tempfile::tempdir().unwrap();
        for (i, text) in texts.iter().enumerate() {
            std::fs::write(dir.path().join(format!("doc{i}.txt")), text).unwrap();
        }
        let documents = DirectoryReader::load(dir.path()).unwrap();
        let parser = NodeParser::new(2048, 20);
        let embedder = CountingEmbedder::default();
        Arc::new(
            VectorIndex::build(&documents, &parser, &embedder)
                .await
                .unwrap(),
        )
    }

    fn engine(
        index: Arc<VectorIndex>,
        llm: Arc<dyn ChatModel>,
        helper: PromptHelper,
    ) -> QueryEngine {
        QueryEngine::new(index, Arc::new(CountingEmbedder::default()), llm, helper, 2).unwrap()
    }

    #[test]
    fn estimate_tokens_takes_the_larger_bound() {
        // 3 words, 11 chars -> ceil(11/4) = 3
        assert_eq!(PromptHelper::estimate_tokens("one two six"), 3);
        // 1 word, 16 chars -> 4
        assert_eq!(PromptHelper::estimate_tokens("aaaaaaaaaaaaaaaa"), 4);
        assert_eq!(PromptHelper::estimate_tokens(""), 0);
    }

    #[test]
    fn context_budget_subtracts_reservations() {
        let helper = PromptHelper::new(100, 30);
        assert_eq!(helper.context_budget(20), Some(50));
        assert_eq!(helper.context_budget(70), None);
        assert_eq!(helper.context_budget(200), None);
    }

    #[test]
    fn pack_consumes_chunks_in_order() {
        let helper = PromptHelper::new(1000, 0);
        let mut remaining = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let packed = helper.pack(&mut remaining, 100).unwrap();
        assert!(packed.contains("alpha beta"));
        assert!(packed.contains("gamma delta"));
        assert!(remaining.is_empty());
    }

    #[test]
    fn pack_truncates_an_oversized_first_chunk() {
        let helper = PromptHelper::new(1000, 0);
        let mut remaining = vec!["word ".repeat(200)];
        let packed = helper.pack(&mut remaining, 10).unwrap();
        assert!(PromptHelper::estimate_tokens(&packed) <= 10);
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn query_answers_with_sources() {
        let index = small_index(&[
            "cats purr and chase mice around the garden",
            "rust guarantees memory safety without garbage collection",
        ])
        .await;
        let llm = Arc::new(RecordingChat::with_answer("they chase mice"));
        let engine = engine(index, llm.clone(), PromptHelper::new(4096, 256));

        let response = engine.query("what do cats chase?").await.unwrap();
        assert_eq!(response.content, "they chase mice");
        assert_eq!(response.sources.len(), 2);
        assert!(response.sources.iter().any(|s| s.snippet.contains("cats")));

        let prompts = llm.recorded();
        assert_eq!(prompts.len(), 1, "both chunks fit one compact call");
        assert!(prompts[0].contains("what do cats chase?"));
        assert!(prompts[0].contains("cats purr"));
        assert!(prompts[0].contains("Context information is below"));
    }

    #[tokio::test]
    async fn refine_pass_runs_when_chunks_overflow_one_call() {
        let filler_a = format!("cats cats cats {}", "feline garden mice ".repeat(60));
        let filler_b = format!("dogs dogs dogs {}", "canine kennel bone ".repeat(60));
        let index = small_index(&[&filler_a, &filler_b]).await;

        let qa_overhead = PromptHelper::estimate_tokens(&render_qa("cats?", ""));
        // Budget admits one chunk per pass (truncated if need be), never two.
        let helper = PromptHelper::new(qa_overhead + 10 + 250, 10);

        let llm = Arc::new(RecordingChat::with_answer("an answer"));
        let engine = engine(index, llm.clone(), helper);

        engine.query("cats?").await.unwrap();
        let prompts = llm.recorded();
        assert_eq!(prompts.len(), 2, "second chunk needs a refine pass");
        assert!(prompts[0].contains("Context information is below"));
        assert!(prompts[1].contains("existing answer: an answer"));
        assert!(prompts[1].contains("refine the existing answer"));
    }

    #[tokio::test]
    async fn impossible_budget_is_prompt_too_large() {
        let index = small_index(&["some document text"]).await;
        let helper = PromptHelper::new(20, 256);
        let engine = engine(index, Arc::new(RecordingChat::default()), helper);

        let err = engine.query("question").await.unwrap_err();
        assert!(matches!(err, QueryError::PromptTooLarge));
    }

    #[tokio::test]
    async fn chat_failure_maps_to_upstream_llm() {
        let index = small_index(&["some document text"]).await;
        let engine = engine(index, Arc::new(FailingChat), PromptHelper::new(4096, 256));

        let err = engine.query("question").await.unwrap_err();
        assert!(matches!(err, QueryError::UpstreamLlm(_)));
    }

    #[tokio::test]
    async fn constructor_rejects_model_mismatch() {
        let index = small_index(&["text"]).await;

        struct OtherModel;
        #[async_trait::async_trait]
        impl EmbeddingProvider for OtherModel {
            fn model(&self) -> &str {
                "different-model"
            }
            async fn embed(
                &self,
                texts: &[String],
            ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                Ok(texts.iter().map(|_| vec![0.0]).collect())
            }
        }

        let err = QueryEngine::new(
            index,
            Arc::new(OtherModel),
            Arc::new(RecordingChat::default()),
            PromptHelper::new(4096, 256),
            2,
        )
        .unwrap_err();
        assert!(err.to_string().contains("model mismatch"));
    }
}
