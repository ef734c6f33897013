//! Top-level query engine.
//!
//! Owns the end-to-end pipeline for one question: retrieve → deduplicate
//! → route → execute strategy → review. One cancellation token per job
//! threads through every gate wait and LLM call; the deadline timer in
//! the job layer fires that token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chunking::{Gazetteer, PeriodTable, deduplicate};
use crate::config::EngineConfig;
use crate::engine::processor::Processor;
use crate::engine::prompt::PromptSet;
use crate::engine::reviewer::AnswerReviewer;
use crate::engine::router::{QueryRouter, QueryType};
use crate::error::QueryError;
use crate::index::{IndexStore, tokenize};
use crate::llm::{LlmClient, LlmProvider, RateGate};
use crate::retrieval::{Retriever, VectorSearch};

/// Question length bounds, in characters.
const MIN_QUESTION_CHARS: usize = 3;
/// Upper question length bound.
const MAX_QUESTION_CHARS: usize = 500;

/// Result of one completed job.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// Final narrative answer.
    pub answer: String,
    /// Strategy the router selected.
    pub query_type: QueryType,
    /// Passages fed to the processor after deduplication.
    pub passages_used: usize,
    /// Narrative + merge calls issued by the fan-out.
    pub llm_calls: usize,
    /// Correction calls issued by the reviewer.
    pub review_iterations: usize,
    /// `true` when the review loop hit its cap with violations left.
    pub review_capped: bool,
    /// Wall-clock duration of the pipeline.
    pub elapsed: Duration,
}

/// End-to-end query pipeline over immutable, process-wide collaborators.
pub struct QueryEngine {
    store: Arc<IndexStore>,
    retriever: Retriever,
    router: QueryRouter,
    processor: Processor,
    reviewer: AnswerReviewer,
    client: Arc<LlmClient>,
    prompts: Arc<PromptSet>,
    gazetteer: Gazetteer,
}

impl QueryEngine {
    /// Wires the engine from its external collaborators and configuration.
    #[must_use]
    pub fn new(
        store: Arc<IndexStore>,
        vector: Arc<dyn VectorSearch>,
        provider: Arc<dyn LlmProvider>,
        config: &EngineConfig,
    ) -> Self {
        let hierarchy = Arc::new(crate::index::IdentityHierarchy::builtin());
        let gate = RateGate::new(config.rpm_max, config.tpm_max);
        let client = Arc::new(LlmClient::new(provider, gate, config));
        let prompts = Arc::new(PromptSet::load(config.prompt_dir.as_deref()));
        let gazetteer = Gazetteer::default_gazetteer();
        let retriever = Retriever::new(Arc::clone(&store), hierarchy, vector, config);
        let processor = Processor::new(
            Arc::clone(&client),
            Arc::clone(&prompts),
            PeriodTable::default_table(),
            gazetteer.clone(),
            config,
        );
        Self {
            store,
            retriever,
            router: QueryRouter::new(config.large_threshold),
            processor,
            reviewer: AnswerReviewer::new(config),
            client,
            prompts,
            gazetteer,
        }
    }

    /// Runs the full pipeline for one question.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] for validation failures, index invariant
    /// violations, exhausted LLM retries, or the fan-out failure policy.
    /// Cancellation surfaces as [`QueryError::Llm`] with
    /// [`LlmError::Cancelled`](crate::error::LlmError::Cancelled).
    pub async fn run(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome, QueryError> {
        let question = question.trim();
        let chars = question.chars().count();
        if !(MIN_QUESTION_CHARS..=MAX_QUESTION_CHARS).contains(&chars) {
            return Err(QueryError::Validation {
                message: format!(
                    "question must be {MIN_QUESTION_CHARS}-{MAX_QUESTION_CHARS} characters, got {chars}"
                ),
            });
        }

        let start = Instant::now();

        // Step 1: retrieve.
        let retrieval = self.retriever.retrieve(question).await?;

        // Step 2: deduplicate, read through the cache when the query
        // resolved to a single indexed term.
        let cache_term = retrieval.firm_phrase.clone().or_else(|| {
            let tokens = tokenize(question);
            (tokens.len() == 1).then(|| tokens.into_iter().next().unwrap_or_default())
        });
        let cache = cache_term
            .as_deref()
            .and_then(|term| self.store.dedup_cache_for(term));
        let passages = deduplicate(retrieval.passages, cache);

        // Step 3: route (after retrieval; the size signal needs it).
        let query_type = self
            .router
            .route(question, passages.len(), &self.gazetteer);
        info!(
            %query_type,
            passages = passages.len(),
            degraded = retrieval.semantic_degraded,
            "routed question"
        );

        // Step 4: execute the strategy.
        let (draft, telemetry) = self
            .processor
            .process(
                query_type,
                question,
                passages.clone(),
                retrieval.semantic_degraded,
                cancel,
            )
            .await?;

        // Step 5: review.
        let review = self
            .reviewer
            .review(
                &self.client,
                &self.prompts,
                question,
                draft,
                &passages,
                cancel,
            )
            .await?;

        Ok(QueryOutcome {
            answer: review.draft,
            query_type,
            passages_used: passages.len(),
            llm_calls: telemetry.narrative_calls + telemetry.merge_calls,
            review_iterations: review.iterations,
            review_capped: review.capped,
            elapsed: start.elapsed(),
        })
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("retriever", &self.retriever)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
