//! Hybrid retrieval.
//!
//! Combines keyword lookup (canonical terms widened over the identity
//! hierarchy) with semantic search, applies the firm-phrase isolation
//! rule, and augments sparse keyword results with cited endnotes. Output
//! order is deterministic for fixed inputs and indices, and every passage
//! appears at most once.

pub mod vector;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::IndexError;
use crate::index::{IdentityHierarchy, IndexStore, tokenize};

pub use vector::{HttpVectorSearch, ScoredChunk, VectorSearch};

/// Longest firm phrase considered, in canonical tokens.
const MAX_PHRASE_TOKENS: usize = 4;

/// Provenance of a retrieved passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    /// Found via canonical-term lookup in the keyword index.
    Keyword,
    /// Found via the vector backend.
    Semantic,
    /// An endnote cited by a sparse keyword result set.
    Endnote,
}

/// A passage produced for one query.
#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    /// Chunk id (or endnote id for [`SourceTag::Endnote`] passages).
    pub chunk_id: String,
    /// Full passage text.
    pub text: String,
    /// Semantic similarity score when known, 0.0 otherwise.
    pub score: f32,
    /// How this passage entered the result set.
    pub source: SourceTag,
}

impl RetrievedPassage {
    /// Whitespace-delimited word count of the passage text.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Result of one retrieval pass.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Deduplicated, ordered passages, capped at `MAX_RETRIEVED`.
    pub passages: Vec<RetrievedPassage>,
    /// Number of keyword-sourced chunks before augmentation.
    pub keyword_count: usize,
    /// The indexed phrase that restricted retrieval, when one matched.
    pub firm_phrase: Option<String>,
    /// `true` when the vector backend was unreachable and the result is
    /// keyword-only. The narrative prompt is annotated in that case.
    pub semantic_degraded: bool,
}

/// Hybrid retriever over the keyword index and the vector backend.
pub struct Retriever {
    store: Arc<IndexStore>,
    hierarchy: Arc<IdentityHierarchy>,
    vector: Arc<dyn VectorSearch>,
    k_sem: usize,
    sparse_threshold: usize,
    max_retrieved: usize,
}

impl Retriever {
    /// Creates a retriever over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<IndexStore>,
        hierarchy: Arc<IdentityHierarchy>,
        vector: Arc<dyn VectorSearch>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            hierarchy,
            vector,
            k_sem: config.k_sem,
            sparse_threshold: config.sparse_threshold,
            max_retrieved: config.max_retrieved,
        }
    }

    /// Produces the deduplicated, ranked passage list for a question.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] only on internal invariant violations
    /// (an indexed chunk id with no text). Vector backend failure is not
    /// an error here; it degrades to keyword-only retrieval.
    pub async fn retrieve(&self, question: &str) -> Result<Retrieval, IndexError> {
        let tokens = tokenize(question);

        // Firm-phrase rule: an entity-specific indexed phrase restricts
        // retrieval to exactly its chunk list. No token expansion, no
        // semantic union, no endnote augmentation.
        if let Some(phrase) = self.find_firm_phrase(&tokens) {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut passages = Vec::new();
            for chunk_id in self.store.chunks_for_term(&phrase) {
                if !seen.insert(chunk_id) {
                    continue;
                }
                passages.push(RetrievedPassage {
                    chunk_id: chunk_id.clone(),
                    text: self.store.chunk_text(chunk_id)?.to_string(),
                    score: 0.0,
                    source: SourceTag::Keyword,
                });
            }
            passages.truncate(self.max_retrieved);
            debug!(phrase = %phrase, count = passages.len(), "firm phrase retrieval");
            let keyword_count = passages.len();
            return Ok(Retrieval {
                passages,
                keyword_count,
                firm_phrase: Some(phrase),
                semantic_degraded: false,
            });
        }

        // Keyword lookup over hierarchy-expanded terms, first-seen order.
        let terms = self.expanded_terms(&tokens);
        let mut seen: HashSet<String> = HashSet::new();
        let mut keyword_ids: Vec<String> = Vec::new();
        for term in &terms {
            for chunk_id in self.store.chunks_for_term(term) {
                if seen.insert(chunk_id.clone()) {
                    keyword_ids.push(chunk_id.clone());
                }
            }
        }

        // Semantic search, degrading to keyword-only on backend failure.
        let mut semantic_degraded = false;
        let semantic_hits = match self.vector.semantic_search(question, self.k_sem).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector backend unavailable, keyword-only retrieval");
                semantic_degraded = true;
                Vec::new()
            }
        };
        let semantic_scores: HashMap<&str, f32> = semantic_hits
            .iter()
            .map(|hit| (hit.chunk_id.as_str(), hit.score))
            .collect();

        // Merge: keyword ordering wins for shared chunks, semantic score
        // is kept for later tie-breaks; semantic-only chunks follow in
        // their ranked order.
        let mut passages = Vec::with_capacity(keyword_ids.len() + semantic_hits.len());
        for chunk_id in &keyword_ids {
            passages.push(RetrievedPassage {
                chunk_id: chunk_id.clone(),
                text: self.store.chunk_text(chunk_id)?.to_string(),
                score: semantic_scores.get(chunk_id.as_str()).copied().unwrap_or(0.0),
                source: SourceTag::Keyword,
            });
        }
        for hit in &semantic_hits {
            if seen.insert(hit.chunk_id.clone()) {
                passages.push(RetrievedPassage {
                    chunk_id: hit.chunk_id.clone(),
                    text: self.store.chunk_text(&hit.chunk_id)?.to_string(),
                    score: hit.score,
                    source: SourceTag::Semantic,
                });
            }
        }

        // Endnote augmentation for sparse keyword result sets.
        let keyword_count = keyword_ids.len();
        if keyword_count < self.sparse_threshold {
            let mut seen_endnotes: HashSet<&str> = HashSet::new();
            for chunk_id in &keyword_ids {
                for endnote_id in self.store.endnotes_for_chunk(chunk_id) {
                    if !seen_endnotes.insert(endnote_id) {
                        continue;
                    }
                    passages.push(RetrievedPassage {
                        chunk_id: endnote_id.clone(),
                        text: self.store.endnote_text(endnote_id)?.to_string(),
                        score: 0.0,
                        source: SourceTag::Endnote,
                    });
                }
            }
        }

        passages.truncate(self.max_retrieved);
        debug!(
            keyword = keyword_count,
            semantic = semantic_hits.len(),
            total = passages.len(),
            degraded = semantic_degraded,
            "retrieval complete"
        );
        Ok(Retrieval {
            passages,
            keyword_count,
            firm_phrase: None,
            semantic_degraded,
        })
    }

    /// Finds the longest multi-word token n-gram that is an indexed term.
    /// Longer phrases win; among equal lengths the leftmost wins.
    fn find_firm_phrase(&self, tokens: &[String]) -> Option<String> {
        let max_n = MAX_PHRASE_TOKENS.min(tokens.len());
        for n in (2..=max_n).rev() {
            for window in tokens.windows(n) {
                let phrase = window.join(" ");
                if self.store.is_indexed_phrase(&phrase) {
                    return Some(phrase);
                }
            }
        }
        None
    }

    /// Expands each token downward over the hierarchy, unioning while
    /// preserving first-seen order. Descendants are sorted so the output
    /// is deterministic.
    fn expanded_terms(&self, tokens: &[String]) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut terms: Vec<String> = Vec::new();
        for token in tokens {
            if seen.insert(token.clone()) {
                terms.push(token.clone());
            }
            let mut descendants: Vec<String> =
                self.hierarchy.descendants(token).into_iter().collect();
            descendants.sort_unstable();
            for descendant in descendants {
                if seen.insert(descendant.clone()) {
                    terms.push(descendant);
                }
            }
        }
        terms
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("k_sem", &self.k_sem)
            .field("sparse_threshold", &self.sparse_threshold)
            .field("max_retrieved", &self.max_retrieved)
            .finish_non_exhaustive()
    }
}
