//! Partitioned fan-out over the LLM.
//!
//! The single primitive behind both the period and the geographic
//! processors: one narrative call per batch under a bounded concurrency
//! semaphore (the rate gate arbitrates pacing underneath), batch outputs
//! merged per partition in input order, partition drafts merged in the
//! caller's partition order. Completion order never influences output
//! order.
//!
//! Failure policy: in strict mode any failed partition fails the run; in
//! lenient mode exactly one failed partition degrades to a placeholder
//! section and two or more fail the run.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chunking::PassageBatch;
use crate::engine::prompt::{PromptSet, build_merge_prompt, build_narrative_prompt};
use crate::error::{LlmError, QueryError};
use crate::llm::LlmClient;

/// Sentinel draft for a single failed partition in lenient mode.
const PLACEHOLDER_DRAFT: &str =
    "[This section could not be generated from the available passages.]";

/// One partition ready for fan-out.
#[derive(Debug)]
pub struct Partition {
    /// Partition label (period or region).
    pub label: String,
    /// Size-bounded batches in retrieval order.
    pub batches: Vec<PassageBatch>,
}

/// Counters from one fan-out run.
#[derive(Debug, Default, Clone)]
pub struct FanoutTelemetry {
    /// Narrative calls issued (one per batch).
    pub narrative_calls: usize,
    /// Merge calls issued (per-partition and final).
    pub merge_calls: usize,
    /// Labels of partitions that failed after retries.
    pub failed_partitions: Vec<String>,
}

/// Runs the fan-out/merge pipeline over ordered partitions.
///
/// `scope` names the slicing dimension for the merge prompts. The
/// partitions' order is the final narrative order.
///
/// # Errors
///
/// Returns [`QueryError::ProcessingFailed`] per the failure policy,
/// [`QueryError::Llm`] with [`LlmError::Cancelled`] when the job is
/// cancelled, or the terminal LLM error from a merge call.
#[allow(clippy::too_many_arguments)]
pub async fn run_partitioned(
    client: &Arc<LlmClient>,
    prompts: &PromptSet,
    question: &str,
    scope: &str,
    partitions: Vec<Partition>,
    concurrency: usize,
    strict: bool,
    degraded: bool,
    cancel: &CancellationToken,
) -> Result<(String, FanoutTelemetry), QueryError> {
    let total = partitions.len();
    let mut telemetry = FanoutTelemetry::default();

    // Fan out all batches across all partitions concurrently; results
    // are indexed by (partition, batch) so completion order is irrelevant.
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles: Vec<(usize, usize, tokio::task::JoinHandle<Result<String, LlmError>>)> =
        Vec::new();

    for (p_idx, partition) in partitions.iter().enumerate() {
        for (b_idx, batch) in partition.batches.iter().enumerate() {
            let client = Arc::clone(client);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let prompt = build_narrative_prompt(
                &prompts.narrative,
                question,
                Some(partition.label.as_str()),
                batch,
                degraded,
            );
            telemetry.narrative_calls += 1;

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| LlmError::Cancelled)?;
                client.generate(prompt, &cancel).await.map(|r| r.text)
            });
            handles.push((p_idx, b_idx, handle));
        }
    }

    let mut batch_outputs: Vec<Vec<Option<Result<String, LlmError>>>> = partitions
        .iter()
        .map(|p| (0..p.batches.len()).map(|_| None).collect())
        .collect();
    let joined = futures_util::future::join_all(
        handles
            .into_iter()
            .map(|(p_idx, b_idx, handle)| async move { (p_idx, b_idx, handle.await) }),
    )
    .await;
    for (p_idx, b_idx, joined_result) in joined {
        let result = match joined_result {
            Ok(r) => r,
            Err(join_err) => Err(LlmError::Transient {
                message: format!("task join failed: {join_err}"),
            }),
        };
        batch_outputs[p_idx][b_idx] = Some(result);
    }

    if cancel.is_cancelled() {
        return Err(QueryError::Llm(LlmError::Cancelled));
    }

    // Merge batch outputs per partition, sequentially and in input order.
    let mut drafts: Vec<(String, String)> = Vec::with_capacity(total);
    for (partition, outputs) in partitions.iter().zip(batch_outputs) {
        let mut texts: Vec<String> = Vec::with_capacity(outputs.len());
        let mut failed = false;
        for output in outputs {
            match output {
                Some(Ok(text)) => texts.push(text),
                Some(Err(LlmError::Cancelled)) => {
                    return Err(QueryError::Llm(LlmError::Cancelled));
                }
                Some(Err(e)) => {
                    warn!(partition = %partition.label, error = %e, "batch failed");
                    failed = true;
                }
                None => failed = true,
            }
        }

        if failed {
            telemetry.failed_partitions.push(partition.label.clone());
            drafts.push((partition.label.clone(), PLACEHOLDER_DRAFT.to_string()));
            continue;
        }

        let draft = if texts.len() == 1 {
            texts.pop().unwrap_or_default()
        } else {
            let labeled: Vec<(String, String)> = texts
                .into_iter()
                .enumerate()
                .map(|(i, t)| (format!("{} part {}", partition.label, i + 1), t))
                .collect();
            let prompt = build_merge_prompt(&prompts.merge, question, scope, &labeled);
            telemetry.merge_calls += 1;
            match client.generate(prompt, cancel).await {
                Ok(response) => response.text,
                Err(LlmError::Cancelled) => {
                    return Err(QueryError::Llm(LlmError::Cancelled));
                }
                Err(e) => {
                    warn!(partition = %partition.label, error = %e, "partition merge failed");
                    telemetry.failed_partitions.push(partition.label.clone());
                    drafts.push((partition.label.clone(), PLACEHOLDER_DRAFT.to_string()));
                    continue;
                }
            }
        };
        drafts.push((partition.label.clone(), draft));
    }

    let failed = telemetry.failed_partitions.len();
    if (strict && failed > 0) || failed >= 2 {
        return Err(QueryError::ProcessingFailed { failed, total });
    }

    debug!(
        partitions = total,
        narrative_calls = telemetry.narrative_calls,
        failed,
        "fan-out complete"
    );

    // Final merge across partitions, in the caller's partition order.
    if drafts.len() == 1 {
        let (_, draft) = drafts.remove(0);
        return Ok((draft, telemetry));
    }
    let prompt = build_merge_prompt(&prompts.merge, question, scope, &drafts);
    telemetry.merge_calls += 1;
    let merged = client.generate(prompt, cancel).await.map_err(QueryError::Llm)?;
    Ok((merged.text, telemetry))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::EngineConfig;
    use crate::error::LlmError;
    use crate::llm::provider::{GenerationRequest, GenerationResponse, LlmProvider, TokenUsage};
    use crate::llm::{LlmClient, RateGate};
    use crate::retrieval::{RetrievedPassage, SourceTag};

    /// Provider that answers every prompt with a canned label and can be
    /// scripted to fail prompts containing a marker.
    struct ScriptedProvider {
        calls: AtomicUsize,
        fail_on: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: None,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(marker: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: Some(marker.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());
            if let Some(marker) = &self.fail_on {
                if request.prompt.contains(marker.as_str()) {
                    return Err(LlmError::InvalidRequest {
                        message: "scripted failure".to_string(),
                    });
                }
            }
            Ok(GenerationResponse {
                text: format!("draft-{call}"),
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 10,
                    total_tokens: 20,
                },
            })
        }
    }

    fn passage(id: &str, text: &str) -> RetrievedPassage {
        RetrievedPassage {
            chunk_id: id.to_string(),
            text: text.to_string(),
            score: 0.0,
            source: SourceTag::Keyword,
        }
    }

    fn one_batch(texts: &[(&str, &str)]) -> PassageBatch {
        let passages: Vec<RetrievedPassage> =
            texts.iter().map(|(id, t)| passage(id, t)).collect();
        let word_count = passages.iter().map(RetrievedPassage::word_count).sum();
        PassageBatch {
            passages,
            word_count,
        }
    }

    fn client_for(provider: ScriptedProvider) -> (Arc<LlmClient>, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let config = EngineConfig::builder()
            .api_key("test")
            .max_retries(0)
            .build()
            .unwrap_or_else(|_| unreachable!());
        let client = Arc::new(LlmClient::new(
            Arc::clone(&provider) as Arc<dyn LlmProvider>,
            RateGate::new(1000, 10_000_000),
            &config,
        ));
        (client, provider)
    }

    fn partitions3() -> Vec<Partition> {
        vec![
            Partition {
                label: "london".to_string(),
                batches: vec![one_batch(&[("a", "London 1914.")])],
            },
            Partition {
                label: "new york".to_string(),
                batches: vec![one_batch(&[("b", "New York 1914.")])],
            },
            Partition {
                label: "berlin".to_string(),
                batches: vec![one_batch(&[("c", "Berlin 1914.")])],
            },
        ]
    }

    #[tokio::test]
    async fn test_one_call_per_batch_plus_final_merge() {
        let (client, provider) = client_for(ScriptedProvider::ok());
        let prompts = PromptSet::defaults();
        let (answer, telemetry) = run_partitioned(
            &client,
            &prompts,
            "Panic of 1914",
            "region",
            partitions3(),
            4,
            true,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(telemetry.narrative_calls, 3);
        assert_eq!(telemetry.merge_calls, 1);
        assert!(telemetry.failed_partitions.is_empty());
        assert!(!answer.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_single_partition_skips_final_merge() {
        let (client, provider) = client_for(ScriptedProvider::ok());
        let prompts = PromptSet::defaults();
        let partitions = vec![Partition {
            label: "narrative".to_string(),
            batches: vec![one_batch(&[("a", "Only passage.")])],
        }];
        let (_, telemetry) = run_partitioned(
            &client,
            &prompts,
            "q",
            "period",
            partitions,
            4,
            false,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(telemetry.narrative_calls, 1);
        assert_eq!(telemetry.merge_calls, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lenient_single_failure_gets_placeholder() {
        let (client, _) = client_for(ScriptedProvider::failing_on("Berlin 1914."));
        let prompts = PromptSet::defaults();
        let result = run_partitioned(
            &client,
            &prompts,
            "q",
            "region",
            partitions3(),
            4,
            false,
            false,
            &CancellationToken::new(),
        )
        .await;
        let (_, telemetry) = result.unwrap();
        assert_eq!(telemetry.failed_partitions, ["berlin"]);
    }

    #[tokio::test]
    async fn test_strict_mode_fails_on_any_partition_failure() {
        let (client, _) = client_for(ScriptedProvider::failing_on("Berlin 1914."));
        let prompts = PromptSet::defaults();
        let result = run_partitioned(
            &client,
            &prompts,
            "Panic of 1914",
            "region",
            partitions3(),
            4,
            true,
            false,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(QueryError::ProcessingFailed { failed: 1, total: 3 })
        ));
    }

    #[tokio::test]
    async fn test_two_failures_fail_even_lenient() {
        let (client, _) = client_for(ScriptedProvider::failing_on("1914."));
        let prompts = PromptSet::defaults();
        let result = run_partitioned(
            &client,
            &prompts,
            "q",
            "region",
            partitions3(),
            4,
            false,
            false,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(QueryError::ProcessingFailed { failed: 3, total: 3 })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let (client, _) = client_for(ScriptedProvider::ok());
        let prompts = PromptSet::defaults();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_partitioned(
            &client,
            &prompts,
            "q",
            "region",
            partitions3(),
            4,
            false,
            false,
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(QueryError::Llm(LlmError::Cancelled))));
    }

    #[tokio::test]
    async fn test_multi_batch_partition_merges_in_input_order() {
        let (client, provider) = client_for(ScriptedProvider::ok());
        let prompts = PromptSet::defaults();
        let partitions = vec![Partition {
            label: "1850–1899".to_string(),
            batches: vec![
                one_batch(&[("a", "First batch text.")]),
                one_batch(&[("b", "Second batch text.")]),
            ],
        }];
        let (_, telemetry) = run_partitioned(
            &client,
            &prompts,
            "q",
            "period",
            partitions,
            4,
            false,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(telemetry.narrative_calls, 2);
        assert_eq!(telemetry.merge_calls, 1);
        // The merge prompt must list part 1 before part 2 regardless of
        // which batch call finished first.
        let prompts_seen = provider.prompts.lock().unwrap();
        let merge_prompt = prompts_seen
            .iter()
            .find(|p| p.contains("<drafts"))
            .unwrap();
        let first = merge_prompt.find("part 1").unwrap();
        let second = merge_prompt.find("part 2").unwrap();
        assert!(first < second);
    }
}
