//! # ragserve
//!
//! A retrieval-augmented-generation HTTP service. At startup the service
//! loads a directory of text documents, builds a vector index of
//! overlapping chunks (or reloads a persisted one from the cache
//! directory), and then serves a bearer-authenticated completion endpoint
//! that answers questions by retrieving the top-matching chunks and
//! synthesizing an answer through a hosted chat model with the
//! compact-and-refine strategy.
//!
//! Embedding and chat completion are external collaborators behind the
//! [`embeddings::EmbeddingProvider`] and [`llm::ChatModel`] traits; this
//! crate supplies the configuration glue, index persistence, prompt
//! assembly, and the HTTP surface.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod llm;
pub mod query;
pub mod secrets;
pub mod server;

pub use config::ServiceConfig;
pub use index::VectorIndex;
pub use query::QueryEngine;

/// Crate version reported by the service.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
