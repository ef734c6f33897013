//! Read-only access to the precomputed corpus artifacts.
//!
//! The offline indexing tooling produces four JSON artifacts (plus an
//! optional dedup cache); this module loads them once at startup and
//! serves lookups from immutable maps. All reads are safe from any number
//! of concurrent callers.
//!
//! Artifacts:
//! - `indices.json`: `{version, term_to_chunks, entity_associations?}`
//! - `chunks.json`: the `(chunk_id, text)` view exported from the vector store
//! - `endnotes.json`: list of `{endnote_id, text}`
//! - `chunk_to_endnotes.json`: map of chunk id to endnote ids
//! - `deduplicated_cache.json`: optional, surviving chunk ids per term

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::canonical;
use crate::error::IndexError;

/// On-disk shape of `indices.json`.
#[derive(Debug, Deserialize)]
struct IndicesFile {
    version: u32,
    term_to_chunks: HashMap<String, Vec<String>>,
    /// Parsed for forward compatibility; not a retrieval signal yet.
    #[serde(default)]
    entity_associations: HashMap<String, Vec<String>>,
}

/// On-disk shape of one `endnotes.json` record.
#[derive(Debug, Deserialize)]
struct EndnoteRecord {
    endnote_id: String,
    text: String,
}

/// Immutable lookup store over the corpus artifacts.
#[derive(Debug)]
pub struct IndexStore {
    version: u32,
    term_to_chunks: HashMap<String, Vec<String>>,
    chunk_texts: HashMap<String, String>,
    endnote_texts: HashMap<String, String>,
    chunk_endnotes: HashMap<String, Vec<String>>,
    dedup_cache: HashMap<String, Vec<String>>,
    entity_associations: HashMap<String, Vec<String>>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, IndexError> {
    let raw = std::fs::read_to_string(path).map_err(|e| IndexError::ArtifactRead {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| IndexError::ArtifactParse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

impl IndexStore {
    /// Loads all artifacts from `data_dir` and validates invariants.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] when an artifact is missing or malformed,
    /// when an indexed term is not canonical, or when the keyword index
    /// references a chunk id with no text.
    pub fn load(data_dir: &Path) -> Result<Self, IndexError> {
        let indices: IndicesFile = read_json(&data_dir.join("indices.json"))?;
        let chunk_texts: HashMap<String, String> = read_json(&data_dir.join("chunks.json"))?;
        let endnotes: Vec<EndnoteRecord> = read_json(&data_dir.join("endnotes.json"))?;
        let chunk_endnotes: HashMap<String, Vec<String>> =
            read_json(&data_dir.join("chunk_to_endnotes.json"))?;

        let cache_path = data_dir.join("deduplicated_cache.json");
        let dedup_cache: HashMap<String, Vec<String>> = if cache_path.exists() {
            read_json(&cache_path)?
        } else {
            HashMap::new()
        };

        let endnote_texts = endnotes
            .into_iter()
            .map(|record| (record.endnote_id, record.text))
            .collect();

        let store = Self {
            version: indices.version,
            term_to_chunks: indices.term_to_chunks,
            chunk_texts,
            endnote_texts,
            chunk_endnotes,
            dedup_cache,
            entity_associations: indices.entity_associations,
        };
        store.validate()?;
        Ok(store)
    }

    /// Builds a store from in-memory parts. Primarily for tests and
    /// fixtures; applies the same validation as [`IndexStore::load`].
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on the same invariant violations as `load`.
    pub fn from_parts(
        term_to_chunks: HashMap<String, Vec<String>>,
        chunk_texts: HashMap<String, String>,
        endnote_texts: HashMap<String, String>,
        chunk_endnotes: HashMap<String, Vec<String>>,
        dedup_cache: HashMap<String, Vec<String>>,
    ) -> Result<Self, IndexError> {
        let store = Self {
            version: 1,
            term_to_chunks,
            chunk_texts,
            endnote_texts,
            chunk_endnotes,
            dedup_cache,
            entity_associations: HashMap::new(),
        };
        store.validate()?;
        Ok(store)
    }

    /// Checks the load-time invariants: canonical terms, no dangling
    /// chunk or endnote references.
    fn validate(&self) -> Result<(), IndexError> {
        for (term, chunk_ids) in &self.term_to_chunks {
            if canonical::canonicalize(term) != *term {
                return Err(IndexError::ArtifactParse {
                    path: "indices.json".to_string(),
                    reason: format!("term '{term}' is not canonical"),
                });
            }
            for chunk_id in chunk_ids {
                if !self.chunk_texts.contains_key(chunk_id) {
                    return Err(IndexError::DanglingChunk {
                        term: term.clone(),
                        chunk_id: chunk_id.clone(),
                    });
                }
            }
        }
        for (chunk_id, endnote_ids) in &self.chunk_endnotes {
            if !self.chunk_texts.contains_key(chunk_id) {
                return Err(IndexError::ChunkNotFound {
                    id: chunk_id.clone(),
                });
            }
            for endnote_id in endnote_ids {
                if !self.endnote_texts.contains_key(endnote_id) {
                    return Err(IndexError::EndnoteNotFound {
                        id: endnote_id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Artifact schema version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Returns the ordered chunk ids for a canonical term, empty if absent.
    #[must_use]
    pub fn chunks_for_term(&self, term: &str) -> &[String] {
        self.term_to_chunks.get(term).map_or(&[], Vec::as_slice)
    }

    /// Returns `true` if the (multi-word) phrase is itself an index key.
    #[must_use]
    pub fn is_indexed_phrase(&self, phrase: &str) -> bool {
        phrase.contains(' ') && self.term_to_chunks.contains_key(phrase)
    }

    /// Returns the text of a chunk.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ChunkNotFound`] for unknown ids; at query
    /// time this is an internal invariant violation.
    pub fn chunk_text(&self, chunk_id: &str) -> Result<&str, IndexError> {
        self.chunk_texts
            .get(chunk_id)
            .map(String::as_str)
            .ok_or_else(|| IndexError::ChunkNotFound {
                id: chunk_id.to_string(),
            })
    }

    /// Returns the endnote ids cited by a chunk, empty if none.
    #[must_use]
    pub fn endnotes_for_chunk(&self, chunk_id: &str) -> &[String] {
        self.chunk_endnotes.get(chunk_id).map_or(&[], Vec::as_slice)
    }

    /// Returns the text of an endnote.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EndnoteNotFound`] for unknown ids.
    pub fn endnote_text(&self, endnote_id: &str) -> Result<&str, IndexError> {
        self.endnote_texts
            .get(endnote_id)
            .map(String::as_str)
            .ok_or_else(|| IndexError::EndnoteNotFound {
                id: endnote_id.to_string(),
            })
    }

    /// Returns the precomputed surviving chunk ids for a term, when the
    /// optional dedup cache carries an entry for it.
    #[must_use]
    pub fn dedup_cache_for(&self, term: &str) -> Option<&[String]> {
        self.dedup_cache.get(term).map(Vec::as_slice)
    }

    /// Entity associations from `indices.json` (unused by retrieval).
    #[must_use]
    pub const fn entity_associations(&self) -> &HashMap<String, Vec<String>> {
        &self.entity_associations
    }

    /// Number of indexed terms.
    #[must_use]
    pub fn term_count(&self) -> usize {
        self.term_to_chunks.len()
    }

    /// Number of chunks with text.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_texts.len()
    }

    /// Number of endnotes.
    #[must_use]
    pub fn endnote_count(&self) -> usize {
        self.endnote_texts.len()
    }
}
