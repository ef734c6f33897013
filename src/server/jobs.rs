//! In-memory job registry for the async submit/poll pattern.
//!
//! Records are immutable snapshots behind `Arc`: transitions replace the
//! whole record under one mutex, so status reads never observe a
//! half-written job. Only the background worker transitions a job, and
//! transitions are monotone: `pending → running → (complete | error)`.
//!
//! The worker owns the per-job deadline: when it fires, the job's
//! cancellation token is cancelled (reclaiming gate reservations and
//! aborting in-flight LLM calls) and the job terminates with a deadline
//! error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::QueryEngine;
use crate::error::{LlmError, QueryError};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Accepted, waiting for the worker.
    Pending,
    /// Worker picked it up.
    Running,
    /// Finished with an answer.
    Complete,
    /// Finished with an error.
    Error,
}

impl JobStatus {
    /// Wire-format name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// `true` for `complete` and `error`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Immutable snapshot of one job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Job id handed back on submit.
    pub job_id: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// The submitted question.
    pub question: String,
    /// Final answer, for `complete` jobs.
    pub answer: Option<String>,
    /// Stable, minimal error message, for `error` jobs.
    pub error: Option<String>,
    /// When the job was accepted.
    pub submitted_at: Instant,
    /// When the job reached a terminal state.
    pub finished_at: Option<Instant>,
}

impl JobRecord {
    /// Seconds from submit to finish, or to now for live jobs.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.submitted_at)
            .as_secs_f64()
    }
}

/// Maps a pipeline error to the stable message shown to clients. The
/// full chain goes to the log; the user gets the minimum plus the job id
/// for correlation.
fn public_message(error: &QueryError) -> String {
    match error {
        QueryError::Validation { message } => message.clone(),
        QueryError::DeadlineExceeded | QueryError::Llm(LlmError::Cancelled) => {
            "job deadline exceeded".to_string()
        }
        QueryError::ProcessingFailed { .. } => {
            "narrative generation failed for too many sections".to_string()
        }
        QueryError::Llm(LlmError::InvalidRequest { .. }) => {
            "the language model rejected the request".to_string()
        }
        QueryError::Llm(LlmError::AuthFailure) => "authentication failed".to_string(),
        _ => "internal error".to_string(),
    }
}

/// Async submit/poll registry with a cap on active jobs.
#[derive(Debug)]
pub struct JobStore {
    jobs: Mutex<HashMap<String, Arc<JobRecord>>>,
    max_active: usize,
}

impl JobStore {
    /// Creates a store refusing submissions past `max_active` live jobs.
    #[must_use]
    pub fn new(max_active: usize) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            max_active,
        })
    }

    fn store_record(&self, record: JobRecord) {
        #[allow(clippy::unwrap_used)]
        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(record.job_id.clone(), Arc::new(record));
    }

    /// Pending plus running jobs.
    #[must_use]
    pub fn active_count(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        let jobs = self.jobs.lock().unwrap();
        jobs.values().filter(|j| !j.status.is_terminal()).count()
    }

    /// Returns a consistent snapshot of the job, if known.
    #[must_use]
    pub fn status(&self, job_id: &str) -> Option<Arc<JobRecord>> {
        #[allow(clippy::unwrap_used)]
        let jobs = self.jobs.lock().unwrap();
        jobs.get(job_id).cloned()
    }

    /// Accepts a question, spawns the background worker, and returns the
    /// job id immediately.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::TooManyJobs`] when the active-job cap is
    /// reached.
    pub fn submit(
        self: &Arc<Self>,
        engine: Arc<QueryEngine>,
        question: String,
        deadline: Duration,
    ) -> Result<String, QueryError> {
        let active = self.active_count();
        if active >= self.max_active {
            return Err(QueryError::TooManyJobs { active });
        }

        let job_id = Uuid::new_v4().to_string();
        let submitted_at = Instant::now();
        self.store_record(JobRecord {
            job_id: job_id.clone(),
            status: JobStatus::Pending,
            question: question.clone(),
            answer: None,
            error: None,
            submitted_at,
            finished_at: None,
        });

        let store = Arc::clone(self);
        let worker_id = job_id.clone();
        tokio::spawn(async move {
            store.run_job(&engine, &worker_id, &question, submitted_at, deadline).await;
        });

        Ok(job_id)
    }

    async fn run_job(
        &self,
        engine: &QueryEngine,
        job_id: &str,
        question: &str,
        submitted_at: Instant,
        deadline: Duration,
    ) {
        self.store_record(JobRecord {
            job_id: job_id.to_string(),
            status: JobStatus::Running,
            question: question.to_string(),
            answer: None,
            error: None,
            submitted_at,
            finished_at: None,
        });

        let cancel = CancellationToken::new();
        let result = tokio::select! {
            r = engine.run(question, &cancel) => r,
            () = tokio::time::sleep(deadline) => {
                cancel.cancel();
                Err(QueryError::DeadlineExceeded)
            }
        };

        let finished_at = Some(Instant::now());
        match result {
            Ok(outcome) => {
                info!(
                    job_id,
                    query_type = %outcome.query_type,
                    passages = outcome.passages_used,
                    llm_calls = outcome.llm_calls,
                    review_iterations = outcome.review_iterations,
                    review_capped = outcome.review_capped,
                    elapsed_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
                    "job complete"
                );
                self.store_record(JobRecord {
                    job_id: job_id.to_string(),
                    status: JobStatus::Complete,
                    question: question.to_string(),
                    answer: Some(outcome.answer),
                    error: None,
                    submitted_at,
                    finished_at,
                });
            }
            Err(e) => {
                error!(job_id, error = %e, "job failed");
                self.store_record(JobRecord {
                    job_id: job_id.to_string(),
                    status: JobStatus::Error,
                    question: question.to_string(),
                    answer: None,
                    error: Some(public_message(&e)),
                    submitted_at,
                    finished_at,
                });
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap as Map;

    use async_trait::async_trait;

    use super::*;
    use crate::config::EngineConfig;
    use crate::error::RetrievalError;
    use crate::index::IndexStore;
    use crate::llm::provider::{GenerationRequest, GenerationResponse, LlmProvider, TokenUsage};
    use crate::retrieval::{ScoredChunk, VectorSearch};

    struct EmptyVector;

    #[async_trait]
    impl VectorSearch for EmptyVector {
        async fn semantic_search(
            &self,
            _query: &str,
            _k: usize,
        ) -> Result<Vec<ScoredChunk>, RetrievalError> {
            Ok(Vec::new())
        }
    }

    struct CannedProvider {
        hang: bool,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, crate::error::LlmError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(GenerationResponse {
                text: "A short narrative about events of 1850.".to_string(),
                usage: TokenUsage::default(),
            })
        }
    }

    fn engine(hang: bool) -> Arc<QueryEngine> {
        let store = Arc::new(
            IndexStore::from_parts(
                Map::from([("lehman".to_string(), vec!["c1".to_string()])]),
                Map::from([(
                    "c1".to_string(),
                    "Lehman opened in Montgomery in 1850.".to_string(),
                )]),
                Map::new(),
                Map::new(),
                Map::new(),
            )
            .unwrap_or_else(|e| unreachable!("fixture store: {e}")),
        );
        let config = EngineConfig::builder()
            .api_key("test")
            .max_review_iterations(0)
            .build()
            .unwrap_or_else(|_| unreachable!());
        Arc::new(QueryEngine::new(
            store,
            Arc::new(EmptyVector),
            Arc::new(CannedProvider { hang }),
            &config,
        ))
    }

    async fn wait_terminal(store: &Arc<JobStore>, job_id: &str) -> Arc<JobRecord> {
        for _ in 0..200 {
            if let Some(record) = store.status(job_id) {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        store.status(job_id).unwrap_or_else(|| unreachable!("job vanished"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_and_complete() {
        let store = JobStore::new(4);
        let job_id = store
            .submit(engine(false), "Tell me about Lehman".to_string(), Duration::from_secs(60))
            .unwrap();

        let record = wait_terminal(&store, &job_id).await;
        assert_eq!(record.status, JobStatus::Complete);
        assert!(record.answer.as_deref().unwrap_or_default().contains("1850"));
        assert!(record.error.is_none());
        assert!(record.finished_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded_cancels_job() {
        let store = JobStore::new(4);
        let job_id = store
            .submit(engine(true), "Tell me about Lehman".to_string(), Duration::from_secs(5))
            .unwrap();

        let record = wait_terminal(&store, &job_id).await;
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error.as_deref(), Some("job deadline exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_job_id() {
        let store = JobStore::new(4);
        assert!(store.status("no-such-job").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_cap_refuses_submissions() {
        let store = JobStore::new(0);
        let result = store.submit(
            engine(false),
            "Tell me about Lehman".to_string(),
            Duration::from_secs(60),
        );
        assert!(matches!(result, Err(QueryError::TooManyJobs { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_transitions_monotone() {
        let store = JobStore::new(4);
        let job_id = store
            .submit(engine(false), "Tell me about Lehman".to_string(), Duration::from_secs(60))
            .unwrap();

        let mut last = 0u8;
        let rank = |s: JobStatus| match s {
            JobStatus::Pending => 0u8,
            JobStatus::Running => 1,
            JobStatus::Complete | JobStatus::Error => 2,
        };
        for _ in 0..200 {
            if let Some(record) = store.status(&job_id) {
                let now = rank(record.status);
                assert!(now >= last, "status regressed");
                last = now;
                if record.status.is_terminal() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(last, 2);
    }
}
