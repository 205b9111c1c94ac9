//! Service configuration.
//!
//! All environment lookup happens in [`ServiceConfig::from_env`], once, after
//! the secret loader has run. The resulting struct is threaded explicitly
//! through every constructor; no other module reads the process environment
//! for configuration.

use std::path::PathBuf;

use anyhow::Context;

/// Default chunk size in characters, matching the node-parser policy the
/// index was designed around.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default overlap between consecutive chunks, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 20;

/// Default number of chunks retrieved per query.
pub const DEFAULT_SIMILARITY_TOP_K: usize = 2;

/// Default maximum input tokens per LLM call.
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 4096;

/// Default reservation for the model's output, in tokens.
pub const DEFAULT_NUM_OUTPUT_TOKENS: usize = 256;

/// Default timeout applied to upstream provider calls, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Bearer secret required on the completion route.
    pub api_key: String,
    /// Directory of source documents.
    pub data_dir: PathBuf,
    /// Directory holding the persisted index.
    pub cache_dir: PathBuf,
    /// OpenAI API key shared by both providers.
    pub openai_api_key: String,
    /// Embedding model identifier.
    pub embed_model: String,
    /// Chat completion model identifier.
    pub chat_model: String,
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, in characters.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per query.
    pub similarity_top_k: usize,
    /// Maximum input tokens per LLM call.
    pub max_input_tokens: usize,
    /// Tokens reserved for the model's output.
    pub num_output_tokens: usize,
    /// Timeout for upstream provider calls, in seconds.
    pub request_timeout_secs: u64,
}

impl ServiceConfig {
    /// Build the configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `PORT` — listen port (default 80)
    /// - `API_KEY` — bearer secret (required)
    /// - `DATA_DIR` — document directory (default `./data`)
    /// - `CACHE_DIR` — index cache directory (default `./cache`)
    /// - `OPENAI_API_KEY` — provider credential (required)
    /// - `EMBED_MODEL` — embedding model (default `text-embedding-ada-002`)
    /// - `CHAT_MODEL` — chat model (default `gpt-3.5-turbo`)
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "80".to_string())
            .parse()
            .context("PORT must be a valid port number")?;

        let api_key = std::env::var("API_KEY").context("API_KEY is required")?;
        let openai_api_key =
            std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is required")?;

        let data_dir =
            PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()));
        let cache_dir =
            PathBuf::from(std::env::var("CACHE_DIR").unwrap_or_else(|_| "./cache".to_string()));

        let embed_model = std::env::var("EMBED_MODEL")
            .unwrap_or_else(|_| "text-embedding-ada-002".to_string());
        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());

        Ok(Self {
            port,
            api_key,
            data_dir,
            cache_dir,
            openai_api_key,
            embed_model,
            chat_model,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            similarity_top_k: DEFAULT_SIMILARITY_TOP_K,
            max_input_tokens: DEFAULT_MAX_INPUT_TOKENS,
            num_output_tokens: DEFAULT_NUM_OUTPUT_TOKENS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        })
    }
}
