//! Semantic retrieval over the corpus.
//!
//! Thin client for the vector search sidecar exposed by the offline
//! indexing tooling. The engine consumes the backend only through the
//! [`VectorSearch`] trait, so tests substitute scripted stubs and the
//! retriever can degrade to keyword-only search when the backend is down.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RetrievalError;

/// One ranked hit from the vector backend. Scores are monotone (higher
/// is closer) and opaque beyond ordering.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredChunk {
    /// Chunk id in the corpus store.
    pub chunk_id: String,
    /// Similarity score.
    pub score: f32,
}

/// Trait for semantic search backends.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Returns up to `k` chunk ids ranked by similarity to `query`.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::SearchUnavailable`] when the backing
    /// store is unreachable; the retriever degrades to keyword-only.
    async fn semantic_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<ScoredChunk>,
}

/// HTTP client for the vector search sidecar.
///
/// Speaks the sidecar's JSON contract: `POST {base}/search` with
/// `{"query", "k"}`, answered by `{"results": [{"chunk_id", "score"}]}`.
#[derive(Debug, Clone)]
pub struct HttpVectorSearch {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVectorSearch {
    /// Creates a client for the sidecar at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl VectorSearch for HttpVectorSearch {
    async fn semantic_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "query": query, "k": k }))
            .send()
            .await
            .map_err(|e| RetrievalError::SearchUnavailable {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(RetrievalError::SearchUnavailable {
                message: format!("vector backend returned {}", response.status()),
            });
        }

        let body: SearchResponse =
            response
                .json()
                .await
                .map_err(|e| RetrievalError::SearchUnavailable {
                    message: format!("malformed search response: {e}"),
                })?;
        Ok(body.results)
    }
}
