//! Error types for the ragserve service.
//!
//! Startup errors (`SecretError`, `IndexError`) are unrecoverable: the binary
//! logs them and exits before the listener accepts traffic. Request-level
//! errors (`QueryError`) are caught at the HTTP boundary and mapped to status
//! codes without crashing the service.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while bootstrapping secrets from the parameter store.
///
/// All variants are fatal at startup.
#[derive(Debug, Error)]
pub enum SecretError {
    /// The parameter store was unreachable or rejected the request.
    #[error("failed to fetch parameter '{name}': {message}")]
    Fetch { name: String, message: String },

    /// The decrypted blob was not valid newline-delimited KEY=VALUE pairs.
    #[error("malformed secret blob at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// Errors raised while building, persisting, or loading the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The data directory contained no readable documents.
    #[error("no documents found in {}", .dir.display())]
    NoDocuments { dir: PathBuf },

    /// A persisted cache exists but cannot be trusted.
    ///
    /// Raised for unreadable stores, inconsistent node/vector counts, an
    /// embedding-model mismatch, or a corpus fingerprint that no longer
    /// matches the data directory. Always fatal; the service never silently
    /// rebuilds over a cache it cannot explain.
    #[error("index cache at {} is invalid: {reason}", .dir.display())]
    CacheCorrupt { dir: PathBuf, reason: String },

    /// Filesystem error while reading documents or cache files.
    #[error("index I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize or write the index to the cache directory.
    #[error("failed to persist index to {}: {message}", .dir.display())]
    Persist { dir: PathBuf, message: String },

    /// Inconsistency while assembling a fresh index.
    #[error("index build error: {0}")]
    Build(String),

    /// The embedding provider failed during a fresh build.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// Errors from the embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The provider returned an error status, a malformed body, or the
    /// request failed at the transport level.
    #[error("embedding provider error: {0}")]
    Upstream(String),
}

/// Errors from the chat-completion provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider returned an error status, a malformed body, or the
    /// request failed at the transport level.
    #[error("chat completion provider error: {0}")]
    Upstream(String),
}

/// Per-request errors surfaced by the query engine.
///
/// Mapped to 5xx responses at the HTTP boundary; the response body carries a
/// generic message while the full detail goes to the log.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query-time embedding call failed.
    #[error(transparent)]
    UpstreamEmbedding(#[from] EmbeddingError),

    /// A synthesis call to the chat model failed.
    #[error(transparent)]
    UpstreamLlm(#[from] LlmError),

    /// The prompt cannot fit the model's input budget even after trimming
    /// the packed context down to nothing.
    #[error("prompt exceeds the input token budget and cannot be trimmed to fit")]
    PromptTooLarge,
}
