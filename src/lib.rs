//! # Chronicle-RS
//!
//! Narrative question-answering engine for a fixed corpus of historical
//! banking documents. A question is classified, expanded over an
//! identity/term hierarchy, answered from a hybrid keyword + semantic
//! index, partitioned by period or geography, narrated by a bounded
//! rate-limited fan-out of LLM calls, and reviewed against the corpus's
//! analytical framework before the final answer is returned.
//!
//! ## Pipeline
//!
//! ```text
//! question → QueryEngine
//!   ├── Retriever (keyword index + hierarchy + vector backend)
//!   ├── ChunkProcessor (dedup, partition, batch)
//!   ├── QueryRouter (event / period / geo / small)
//!   ├── Fan-out → N concurrent narrative calls under the RateGate
//!   ├── Merge partial narratives in chronological order
//!   └── AnswerReviewer → final narrative → JobStore
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod chunking;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod llm;
pub mod retrieval;
pub mod server;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export configuration and CLI
pub use cli::{Cli, Commands};
pub use config::{EngineConfig, EngineConfigBuilder};

// Re-export index types
pub use index::{IdentityHierarchy, IndexStore, canonicalize, tokenize};

// Re-export retrieval types
pub use retrieval::{
    HttpVectorSearch, Retrieval, RetrievedPassage, Retriever, ScoredChunk, SourceTag, VectorSearch,
};

// Re-export processing types
pub use chunking::{Gazetteer, PassageBatch, PeriodTable, batch, deduplicate};

// Re-export LLM types
pub use llm::{GenerationResponse, LlmClient, LlmProvider, RateGate, create_provider};

// Re-export engine types
pub use engine::{
    AnswerReviewer, PromptSet, QueryEngine, QueryOutcome, QueryRouter, QueryType,
};

// Re-export server types
pub use server::{AppState, JobRecord, JobStatus, JobStore};
