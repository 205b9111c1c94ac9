//! Splitting documents into overlapping chunks (nodes).

use serde::{Deserialize, Serialize};

use crate::index::content_id;
use crate::index::documents::Document;

/// A bounded slice of a document's text. The unit indexed and retrieved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Content-derived identifier (hex SHA-256 of source + chunk text).
    pub node_id: String,
    /// The chunk text.
    pub text: String,
    /// Identifier of the document this chunk was cut from.
    pub doc_id: String,
    /// File name of the originating document.
    pub source: String,
}

/// Splits document text into chunks with a sliding character window.
///
/// Consecutive chunks share `chunk_overlap` characters so context is not
/// lost at chunk boundaries. Sizes are measured in characters, not bytes,
/// so multi-byte text never splits inside a code point.
#[derive(Debug, Clone)]
pub struct NodeParser {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl NodeParser {
    /// Create a parser.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_overlap >= chunk_size` or `chunk_size == 0`; both
    /// would make the window stop advancing.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be positive");
        assert!(
            chunk_overlap < chunk_size,
            "chunk_overlap must be smaller than chunk_size"
        );
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Split every document into nodes, preserving document order.
    pub fn parse(&self, documents: &[Document]) -> Vec<Node> {
        let mut nodes = Vec::new();
        for document in documents {
            for chunk in self.chunk_text(&document.text) {
                let node_id = content_id(&document.source, &chunk);
                nodes.push(Node {
                    node_id,
                    text: chunk,
                    doc_id: document.doc_id.clone(),
                    source: document.source.clone(),
                });
            }
        }
        nodes
    }

    /// Split a single text into overlapping chunks of at most
    /// `chunk_size` characters.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.chunk_size {
            return vec![text.to_string()];
        }

        let stride = self.chunk_size - self.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += stride;
        }
        chunks
    }
}
