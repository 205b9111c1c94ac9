//! The vector index: build, persist, load, retrieve.
//!
//! The index is built once at startup and read-only afterwards. On disk it
//! is three JSON files under the cache directory:
//!
//! - `docstore.json` — the chunk nodes (text plus reverse lookup to source)
//! - `vector_store.json` — one embedding vector per node, in node order
//! - `manifest.json` — format version, embedding model id, vector
//!   dimension, corpus fingerprint, node count, build timestamp
//!
//! Every file is written to a `.tmp` sibling and renamed into place, with
//! the manifest last: the manifest is the validity marker, so a crash
//! mid-persist leaves no manifest and the next start rebuilds from scratch.
//! A manifest that is present but unreadable, inconsistent, built with a
//! different embedding model, or fingerprinted against a different corpus
//! is a fatal [`IndexError::CacheCorrupt`] — the service fails loudly
//! instead of silently re-embedding over data it cannot explain.

pub mod documents;
pub mod node_parser;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ServiceConfig;
use crate::embeddings::EmbeddingProvider;
use crate::error::IndexError;

pub use documents::{DirectoryReader, Document};
pub use node_parser::{Node, NodeParser};

/// On-disk format version; bump on any layout change.
pub const INDEX_FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const DOCSTORE_FILE: &str = "docstore.json";
const VECTOR_STORE_FILE: &str = "vector_store.json";

/// Hex SHA-256 over a source label and a text body. Used for document and
/// node identifiers so ids are stable across runs.
pub fn content_id(source: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache metadata, written last during persist and validated on load.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    embed_model: String,
    dimension: usize,
    corpus_fingerprint: String,
    node_count: usize,
    built_at: DateTime<Utc>,
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f32,
}

/// The aggregate of all chunks and their embedding vectors.
///
/// Read-only shared state after construction; concurrent requests query it
/// without synchronization.
#[derive(Debug)]
pub struct VectorIndex {
    nodes: Vec<Node>,
    vectors: Vec<Vec<f32>>,
    embed_model: String,
    corpus_fingerprint: String,
}

impl VectorIndex {
    /// The embedding model the index was built with.
    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fingerprint of the document corpus, stable across runs: hex SHA-256
    /// over the sorted document ids (which are themselves content hashes).
    pub fn fingerprint(documents: &[Document]) -> String {
        let mut ids: Vec<&str> = documents.iter().map(|d| d.doc_id.as_str()).collect();
        ids.sort_unstable();
        let mut hasher = Sha256::new();
        for id in ids {
            hasher.update(id.as_bytes());
            hasher.update([0]);
        }
        hex::encode(hasher.finalize())
    }

    /// Build a fresh index: chunk every document and embed every chunk in
    /// one batched provider call.
    pub async fn build(
        documents: &[Document],
        parser: &NodeParser,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self, IndexError> {
        let nodes = parser.parse(documents);
        let texts: Vec<String> = nodes.iter().map(|n| n.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;

        if vectors.len() != nodes.len() {
            return Err(IndexError::Build(format!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                nodes.len()
            )));
        }

        tracing::info!(
            nodes = nodes.len(),
            model = embedder.model(),
            "vector index built"
        );

        Ok(Self {
            nodes,
            vectors,
            embed_model: embedder.model().to_string(),
            corpus_fingerprint: Self::fingerprint(documents),
        })
    }

    /// Persist the index. After this returns, [`VectorIndex::load`] on the
    /// same directory reconstructs an identical index with no embedding
    /// calls.
    pub fn persist(&self, cache_dir: &Path) -> Result<(), IndexError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| IndexError::Io {
            path: cache_dir.to_path_buf(),
            source: e,
        })?;

        write_json_atomic(&cache_dir.join(DOCSTORE_FILE), &self.nodes)?;
        write_json_atomic(&cache_dir.join(VECTOR_STORE_FILE), &self.vectors)?;

        // Manifest goes last: its presence marks the cache as complete.
        let manifest = Manifest {
            version: INDEX_FORMAT_VERSION,
            embed_model: self.embed_model.clone(),
            dimension: self.vectors.first().map(|v| v.len()).unwrap_or(0),
            corpus_fingerprint: self.corpus_fingerprint.clone(),
            node_count: self.nodes.len(),
            built_at: Utc::now(),
        };
        write_json_atomic(&cache_dir.join(MANIFEST_FILE), &manifest)?;

        tracing::info!(dir = %cache_dir.display(), nodes = self.nodes.len(), "index persisted");
        Ok(())
    }

    /// Whether a completed persist exists under the directory.
    pub fn has_cache(cache_dir: &Path) -> bool {
        cache_dir.join(MANIFEST_FILE).is_file()
    }

    /// Load a persisted index and validate it against the configured
    /// embedding model and the current corpus fingerprint.
    pub fn load(
        cache_dir: &Path,
        expected_model: &str,
        expected_fingerprint: &str,
    ) -> Result<Self, IndexError> {
        let corrupt = |reason: String| IndexError::CacheCorrupt {
            dir: cache_dir.to_path_buf(),
            reason,
        };

        let manifest: Manifest = read_json(&cache_dir.join(MANIFEST_FILE))
            .map_err(|e| corrupt(format!("unreadable manifest: {}", e)))?;

        if manifest.version != INDEX_FORMAT_VERSION {
            return Err(corrupt(format!(
                "format version {} (expected {})",
                manifest.version, INDEX_FORMAT_VERSION
            )));
        }
        if manifest.embed_model != expected_model {
            return Err(corrupt(format!(
                "embedding model mismatch: cache built with '{}', configured '{}'",
                manifest.embed_model, expected_model
            )));
        }
        if manifest.corpus_fingerprint != expected_fingerprint {
            return Err(corrupt(
                "corpus fingerprint mismatch: data directory changed since the cache was built"
                    .to_string(),
            ));
        }

        let nodes: Vec<Node> = read_json(&cache_dir.join(DOCSTORE_FILE))
            .map_err(|e| corrupt(format!("unreadable docstore: {}", e)))?;
        let vectors: Vec<Vec<f32>> = read_json(&cache_dir.join(VECTOR_STORE_FILE))
            .map_err(|e| corrupt(format!("unreadable vector store: {}", e)))?;

        if nodes.len() != manifest.node_count || vectors.len() != manifest.node_count {
            return Err(corrupt(format!(
                "inconsistent counts: manifest={}, docstore={}, vectors={}",
                manifest.node_count,
                nodes.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != manifest.dimension) {
            return Err(corrupt(format!(
                "vector dimension {} does not match manifest dimension {}",
                bad.len(),
                manifest.dimension
            )));
        }

        tracing::info!(dir = %cache_dir.display(), nodes = nodes.len(), "index loaded from cache");
        Ok(Self {
            nodes,
            vectors,
            embed_model: manifest.embed_model,
            corpus_fingerprint: manifest.corpus_fingerprint,
        })
    }

    /// Startup entry point: reload a valid cache, or build fresh from the
    /// data directory and persist before returning.
    ///
    /// A cached load never calls the embedding provider.
    pub async fn load_or_build(
        config: &ServiceConfig,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self, IndexError> {
        let documents = DirectoryReader::load(&config.data_dir)?;
        let fingerprint = Self::fingerprint(&documents);

        if Self::has_cache(&config.cache_dir) {
            return Self::load(&config.cache_dir, embedder.model(), &fingerprint);
        }

        let parser = NodeParser::new(config.chunk_size, config.chunk_overlap);
        let index = Self::build(&documents, &parser, embedder).await?;
        index.persist(&config.cache_dir)?;
        Ok(index)
    }

    /// Top-K chunks by cosine similarity, descending. Ties keep node order,
    /// so retrieval is deterministic for a given index.
    pub fn retrieve(&self, query: &[f32], top_k: usize) -> Vec<ScoredNode> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| ScoredNode {
                node: self.nodes[i].clone(),
                score,
            })
            .collect()
    }
}

/// Cosine similarity; zero vectors score 0.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Serialize to a `.tmp` sibling, then rename into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), IndexError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let persist_err = |message: String| IndexError::Persist {
        dir: dir.to_path_buf(),
        message,
    };

    let bytes = serde_json::to_vec(value).map_err(|e| persist_err(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(|e| persist_err(format!("{}: {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, path).map_err(|e| persist_err(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("{}: {}", path.display(), e))
}
