//! Period and geographic processing strategies.
//!
//! Both strategies are thin parameterizations of the partitioned fan-out
//! primitive: period partitioning for large topics, region partitioning
//! for multi-place topics and events. Event queries additionally order
//! regions by first event-year mention and fail on any partition failure.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::chunking::{
    Gazetteer, PassageBatch, PeriodTable, batch, order_regions_by_event_year, partition_by_period,
    partition_by_region,
};
use crate::config::EngineConfig;
use crate::engine::fanout::{FanoutTelemetry, Partition, run_partitioned};
use crate::engine::prompt::PromptSet;
use crate::engine::router::QueryType;
use crate::error::QueryError;
use crate::llm::LlmClient;
use crate::retrieval::RetrievedPassage;

/// Executes the routed processing strategy for one question.
pub struct Processor {
    client: Arc<LlmClient>,
    prompts: Arc<PromptSet>,
    period_table: PeriodTable,
    gazetteer: Gazetteer,
    max_words_per_request: usize,
    concurrency: usize,
}

impl Processor {
    /// Creates a processor sharing the engine's client and prompts.
    #[must_use]
    pub fn new(
        client: Arc<LlmClient>,
        prompts: Arc<PromptSet>,
        period_table: PeriodTable,
        gazetteer: Gazetteer,
        config: &EngineConfig,
    ) -> Self {
        Self {
            client,
            prompts,
            period_table,
            gazetteer,
            max_words_per_request: config.max_words_per_request,
            concurrency: config.llm_concurrency,
        }
    }

    fn to_partitions(
        &self,
        labeled: Vec<(String, Vec<RetrievedPassage>)>,
    ) -> Vec<Partition> {
        labeled
            .into_iter()
            .filter(|(_, passages)| !passages.is_empty())
            .map(|(label, passages)| Partition {
                label,
                batches: batch(passages, self.max_words_per_request),
            })
            .collect()
    }

    /// Runs the strategy selected by the router and returns the merged
    /// draft narrative plus fan-out telemetry.
    ///
    /// # Errors
    ///
    /// Propagates [`QueryError`] from the fan-out per its failure policy.
    pub async fn process(
        &self,
        query_type: QueryType,
        question: &str,
        passages: Vec<RetrievedPassage>,
        degraded: bool,
        cancel: &CancellationToken,
    ) -> Result<(String, FanoutTelemetry), QueryError> {
        let (scope, strict, partitions) = match query_type {
            QueryType::PeriodTopic => {
                let labeled = partition_by_period(passages, &self.period_table);
                ("period", false, self.to_partitions(labeled))
            }
            QueryType::Event => {
                let labeled = order_regions_by_event_year(partition_by_region(
                    passages,
                    &self.gazetteer,
                ));
                ("region", true, self.to_partitions(labeled))
            }
            QueryType::GeoTopic => {
                let labeled = partition_by_region(passages, &self.gazetteer);
                ("region", false, self.to_partitions(labeled))
            }
            QueryType::SmallTopic => {
                let batches: Vec<PassageBatch> = batch(passages, self.max_words_per_request);
                let partitions = vec![Partition {
                    label: "narrative".to_string(),
                    batches,
                }];
                ("narrative", false, partitions)
            }
        };

        if partitions.iter().all(|p| p.batches.is_empty()) {
            return Err(QueryError::Validation {
                message: "no passages retrieved for question".to_string(),
            });
        }

        run_partitioned(
            &self.client,
            &self.prompts,
            question,
            scope,
            partitions,
            self.concurrency,
            strict,
            degraded,
            cancel,
        )
        .await
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("max_words_per_request", &self.max_words_per_request)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}
