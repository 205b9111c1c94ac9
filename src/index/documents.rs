//! Directory-of-files document source.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::index::content_id;

/// A raw text document read from the data directory.
///
/// Immutable after load; consumed once during index build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Content-derived identifier (hex SHA-256 of file name + text).
    pub doc_id: String,
    /// The full text of the file.
    pub text: String,
    /// File name the text came from, kept for source attribution.
    pub source: String,
}

/// Reads every regular file directly under a directory into [`Document`]s.
///
/// Hidden files (leading `.`) and subdirectories are skipped. Files are
/// sorted by name so the corpus fingerprint is stable across runs.
#[derive(Debug, Clone, Default)]
pub struct DirectoryReader;

impl DirectoryReader {
    pub fn load(dir: &Path) -> Result<Vec<Document>, IndexError> {
        let entries = std::fs::read_dir(dir).map_err(|e| IndexError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| !n.starts_with('.'))
                        .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let text = std::fs::read_to_string(&path).map_err(|e| IndexError::Io {
                path: path.clone(),
                source: e,
            })?;
            let source = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let doc_id = content_id(&source, &text);
            documents.push(Document {
                doc_id,
                text,
                source,
            });
        }

        if documents.is_empty() {
            return Err(IndexError::NoDocuments {
                dir: dir.to_path_buf(),
            });
        }

        tracing::info!(dir = %dir.display(), count = documents.len(), "documents loaded");
        Ok(documents)
    }
}
