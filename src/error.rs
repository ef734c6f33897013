//! Error types for chronicle-rs operations.
//!
//! This module provides the error hierarchy using `thiserror` for all
//! engine operations: index loading, retrieval, LLM transport, query
//! orchestration, and configuration. Errors stay typed inside the core;
//! only the HTTP layer maps them to user-visible strings.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for chronicle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for chronicle operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Index artifact errors (loading, validation, lookups).
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Retrieval-layer errors (vector backend).
    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// LLM transport errors.
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    /// Query pipeline errors.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from loading or querying the precomputed index artifacts.
#[derive(Error, Debug)]
pub enum IndexError {
    /// An artifact file could not be read.
    #[error("failed to read artifact {path}: {reason}")]
    ArtifactRead {
        /// Path to the artifact.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// An artifact file could not be parsed.
    #[error("failed to parse artifact {path}: {reason}")]
    ArtifactParse {
        /// Path to the artifact.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// A term in the keyword index references a chunk id with no text.
    #[error("term '{term}' references unknown chunk '{chunk_id}'")]
    DanglingChunk {
        /// Canonical term holding the reference.
        term: String,
        /// The unknown chunk id.
        chunk_id: String,
    },

    /// Chunk id not present in the chunk-text map.
    ///
    /// At query time this is an internal invariant violation, not a
    /// user error.
    #[error("chunk not found: {id}")]
    ChunkNotFound {
        /// Chunk id that was not found.
        id: String,
    },

    /// Endnote id not present in the endnote-text map.
    #[error("endnote not found: {id}")]
    EndnoteNotFound {
        /// Endnote id that was not found.
        id: String,
    },

    /// The identity hierarchy contains a cycle.
    #[error("identity hierarchy cycle through '{term}'")]
    HierarchyCycle {
        /// A term on the detected cycle.
        term: String,
    },
}

/// Errors from the external vector search backend.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The vector backend is not reachable. The retriever degrades to
    /// keyword-only search on this error.
    #[error("vector search unavailable: {message}")]
    SearchUnavailable {
        /// Transport-level detail.
        message: String,
    },
}

/// Errors from the LLM provider, classified into a closed set of kinds.
///
/// Only [`LlmError::RateLimited`] and [`LlmError::Transient`] are
/// retryable; retries are owned by the client wrapper and happen
/// nowhere else.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The provider rejected the request due to rate limiting.
    #[error("rate limited by provider{}", retry_after.map_or_else(String::new, |d| format!(" (retry after {}s)", d.as_secs())))]
    RateLimited {
        /// Suggested wait before retrying, when the provider sent one.
        retry_after: Option<Duration>,
    },

    /// Network failure or provider 5xx.
    #[error("transient provider failure: {message}")]
    Transient {
        /// Transport or provider detail.
        message: String,
    },

    /// Bad prompt size or parameters. Not retryable.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Provider-reported detail.
        message: String,
    },

    /// Missing or rejected credentials. Not retryable.
    #[error("authentication failed")]
    AuthFailure,

    /// Deadline exceeded or the caller cancelled the job.
    #[error("operation cancelled")]
    Cancelled,

    /// Provider name not recognized by the factory.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// The unknown provider name.
        name: String,
    },
}

impl LlmError {
    /// Returns `true` for kinds the client wrapper may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }
}

/// Errors from the query pipeline.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Malformed question (length or content). Surfaced as 400.
    #[error("invalid question: {message}")]
    Validation {
        /// Validation detail.
        message: String,
    },

    /// Unknown job id. Surfaced as 404.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The unknown job id.
        job_id: String,
    },

    /// Too many active jobs. Surfaced as 429.
    #[error("too many active jobs ({active})")]
    TooManyJobs {
        /// Number of pending and running jobs at submit time.
        active: usize,
    },

    /// Too many partitions failed after retries.
    #[error("processing failed: {failed} of {total} partitions failed")]
    ProcessingFailed {
        /// Partitions that failed after retries.
        failed: usize,
        /// Total partitions attempted.
        total: usize,
    },

    /// The job exceeded its deadline; in-flight calls were cancelled.
    #[error("job deadline exceeded")]
    DeadlineExceeded,

    /// Internal invariant violation in the index layer.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// LLM failure that exhausted retries.
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
}

/// Configuration errors, fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No API key was found in the environment or builder.
    #[error("no API key configured (set GEMINI_API_KEY)")]
    ApiKeyMissing,

    /// A tunable has an invalid value.
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// Name of the tunable.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
}
