//! Engine configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.
//! Everything tunable is carried on one [`EngineConfig`] value constructed at
//! startup and passed explicitly; no module-level mutable state.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default requests-per-minute budget across all LLM calls.
const DEFAULT_RPM_MAX: u32 = 60;
/// Default tokens-per-minute budget across all LLM calls.
const DEFAULT_TPM_MAX: u64 = 2_000_000;
/// Default bound on concurrently outstanding LLM calls.
const DEFAULT_LLM_CONCURRENCY: usize = 10;
/// Default word budget per narrative request.
const DEFAULT_MAX_WORDS_PER_REQUEST: usize = 150_000;
/// Default semantic search depth.
const DEFAULT_K_SEM: usize = 50;
/// Keyword result count below which endnote augmentation kicks in.
const DEFAULT_SPARSE_THRESHOLD: usize = 10;
/// Default cap on merged retrieval output.
const DEFAULT_MAX_RETRIEVED: usize = 200;
/// Retrieval size above which a topic query is processed by period.
const DEFAULT_LARGE_THRESHOLD: usize = 100;
/// Default cap on review-loop iterations.
const DEFAULT_MAX_REVIEW_ITERATIONS: usize = 5;
/// Default per-job deadline in seconds.
const DEFAULT_JOB_DEADLINE_SECS: u64 = 420;
/// Default retry attempts for retryable LLM errors.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default cap on pending+running jobs before submissions get 429.
const DEFAULT_MAX_ACTIVE_JOBS: usize = 8;
/// Default generation budget per response.
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

/// Institutions rendered in italics by corpus convention. Used by the
/// answer reviewer's typography check; corpus-specific and overridable.
const DEFAULT_INSTITUTIONS: &[&str] = &[
    "Bank of England",
    "Banque de France",
    "Reichsbank",
    "Credit-Anstalt",
    "Barings",
    "Hope",
    "Federal Reserve",
    "Imperial Ottoman Bank",
    "Deutsche Bank",
];

/// Persons rendered in plain text by corpus convention.
const DEFAULT_PERSONS: &[&str] = &[
    "Nathan Rothschild",
    "Salomon Rothschild",
    "James Rothschild",
    "Moses Montefiore",
    "Abraham Oppenheim",
    "Gerson Bleichroder",
];

/// Configuration for the query engine and its collaborators.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// LLM provider name (e.g., "openai").
    pub provider: String,
    /// API key for the provider.
    pub api_key: String,
    /// Optional base URL override (Gemini OpenAI surface, proxies).
    pub base_url: Option<String>,
    /// Model used for narrative, merge, and review calls.
    pub model: String,
    /// Maximum tokens generated per response.
    pub max_output_tokens: u32,
    /// Sampling temperature for all calls.
    pub temperature: f32,
    /// Requests-per-minute budget enforced by the rate gate.
    pub rpm_max: u32,
    /// Tokens-per-minute budget enforced by the rate gate.
    pub tpm_max: u64,
    /// Bound on concurrently outstanding LLM calls.
    pub llm_concurrency: usize,
    /// Word budget per narrative batch.
    pub max_words_per_request: usize,
    /// Semantic search depth (top-k from the vector backend).
    pub k_sem: usize,
    /// Keyword result count below which endnotes augment the result set.
    pub sparse_threshold: usize,
    /// Cap on the merged retrieval list.
    pub max_retrieved: usize,
    /// Retrieval size above which topic queries partition by period.
    pub large_threshold: usize,
    /// Cap on review-loop iterations.
    pub max_review_iterations: usize,
    /// Per-job wall-clock deadline.
    pub job_deadline: Duration,
    /// Retry attempts for retryable LLM errors.
    pub max_retries: u32,
    /// Pending+running job cap before submissions are refused.
    pub max_active_jobs: usize,
    /// Directory holding the index artifacts.
    pub data_dir: PathBuf,
    /// Base URL of the vector search sidecar.
    pub vector_url: String,
    /// Directory containing prompt template overrides.
    pub prompt_dir: Option<PathBuf>,
    /// Institution names for the typography check (italicized).
    pub institutions: Vec<String>,
    /// Person names for the typography check (plain text).
    pub persons: Vec<String>,
}

impl EngineConfig {
    /// Creates a new builder for `EngineConfig`.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ApiKeyMissing`] if no API key is found.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder().from_env().build()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_output_tokens: Option<u32>,
    temperature: Option<f32>,
    rpm_max: Option<u32>,
    tpm_max: Option<u64>,
    llm_concurrency: Option<usize>,
    max_words_per_request: Option<usize>,
    k_sem: Option<usize>,
    sparse_threshold: Option<usize>,
    max_retrieved: Option<usize>,
    large_threshold: Option<usize>,
    max_review_iterations: Option<usize>,
    job_deadline: Option<Duration>,
    max_retries: Option<u32>,
    max_active_jobs: Option<usize>,
    data_dir: Option<PathBuf>,
    vector_url: Option<String>,
    prompt_dir: Option<PathBuf>,
    institutions: Option<Vec<String>>,
    persons: Option<Vec<String>>,
}

impl EngineConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("CHRONICLE_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("CHRONICLE_BASE_URL").ok();
        }
        if self.model.is_none() {
            self.model = std::env::var("CHRONICLE_MODEL").ok();
        }
        if self.rpm_max.is_none() {
            self.rpm_max = env_parse("RPM_MAX");
        }
        if self.tpm_max.is_none() {
            self.tpm_max = env_parse("TPM_MAX");
        }
        if self.llm_concurrency.is_none() {
            self.llm_concurrency = env_parse("LLM_CONCURRENCY");
        }
        if self.max_words_per_request.is_none() {
            self.max_words_per_request = env_parse("MAX_WORDS_PER_REQUEST");
        }
        if self.k_sem.is_none() {
            self.k_sem = env_parse("K_SEM");
        }
        if self.sparse_threshold.is_none() {
            self.sparse_threshold = env_parse("SPARSE_THRESHOLD");
        }
        if self.max_retrieved.is_none() {
            self.max_retrieved = env_parse("MAX_RETRIEVED");
        }
        if self.large_threshold.is_none() {
            self.large_threshold = env_parse("LARGE_THRESHOLD");
        }
        if self.max_review_iterations.is_none() {
            self.max_review_iterations = env_parse("MAX_REVIEW_ITERATIONS");
        }
        if self.job_deadline.is_none() {
            self.job_deadline = env_parse::<u64>("JOB_DEADLINE").map(Duration::from_secs);
        }
        if self.max_active_jobs.is_none() {
            self.max_active_jobs = env_parse("MAX_ACTIVE_JOBS");
        }
        if self.data_dir.is_none() {
            self.data_dir = std::env::var("CORPUS_DATA_DIR").ok().map(PathBuf::from);
        }
        if self.vector_url.is_none() {
            self.vector_url = std::env::var("VECTOR_DB_URL").ok();
        }
        if self.prompt_dir.is_none() {
            self.prompt_dir = std::env::var("PROMPT_DIR").ok().map(PathBuf::from);
        }
        self
    }

    /// Sets the LLM provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the per-response generation budget.
    #[must_use]
    pub const fn max_output_tokens(mut self, n: u32) -> Self {
        self.max_output_tokens = Some(n);
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    /// Sets the requests-per-minute budget.
    #[must_use]
    pub const fn rpm_max(mut self, n: u32) -> Self {
        self.rpm_max = Some(n);
        self
    }

    /// Sets the tokens-per-minute budget.
    #[must_use]
    pub const fn tpm_max(mut self, n: u64) -> Self {
        self.tpm_max = Some(n);
        self
    }

    /// Sets the concurrent LLM call bound.
    #[must_use]
    pub const fn llm_concurrency(mut self, n: usize) -> Self {
        self.llm_concurrency = Some(n);
        self
    }

    /// Sets the word budget per narrative batch.
    #[must_use]
    pub const fn max_words_per_request(mut self, n: usize) -> Self {
        self.max_words_per_request = Some(n);
        self
    }

    /// Sets the semantic search depth.
    #[must_use]
    pub const fn k_sem(mut self, n: usize) -> Self {
        self.k_sem = Some(n);
        self
    }

    /// Sets the sparse-result threshold for endnote augmentation.
    #[must_use]
    pub const fn sparse_threshold(mut self, n: usize) -> Self {
        self.sparse_threshold = Some(n);
        self
    }

    /// Sets the retrieval output cap.
    #[must_use]
    pub const fn max_retrieved(mut self, n: usize) -> Self {
        self.max_retrieved = Some(n);
        self
    }

    /// Sets the period-partitioning size threshold.
    #[must_use]
    pub const fn large_threshold(mut self, n: usize) -> Self {
        self.large_threshold = Some(n);
        self
    }

    /// Sets the review-loop iteration cap.
    #[must_use]
    pub const fn max_review_iterations(mut self, n: usize) -> Self {
        self.max_review_iterations = Some(n);
        self
    }

    /// Sets the per-job deadline.
    #[must_use]
    pub const fn job_deadline(mut self, d: Duration) -> Self {
        self.job_deadline = Some(d);
        self
    }

    /// Sets the retry cap for retryable LLM errors.
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Sets the active-job cap.
    #[must_use]
    pub const fn max_active_jobs(mut self, n: usize) -> Self {
        self.max_active_jobs = Some(n);
        self
    }

    /// Sets the artifact directory.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the vector search sidecar URL.
    #[must_use]
    pub fn vector_url(mut self, url: impl Into<String>) -> Self {
        self.vector_url = Some(url.into());
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Sets the institution list for the typography check.
    #[must_use]
    pub fn institutions(mut self, names: Vec<String>) -> Self {
        self.institutions = Some(names);
        self
    }

    /// Sets the person list for the typography check.
    #[must_use]
    pub fn persons(mut self, names: Vec<String>) -> Self {
        self.persons = Some(names);
        self
    }

    /// Builds the [`EngineConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ApiKeyMissing`] if no API key was set, or
    /// [`ConfigError::Invalid`] for zero-valued budgets.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let api_key = self.api_key.ok_or(ConfigError::ApiKeyMissing)?;

        let rpm_max = self.rpm_max.unwrap_or(DEFAULT_RPM_MAX);
        if rpm_max == 0 {
            return Err(ConfigError::Invalid {
                name: "RPM_MAX".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        let tpm_max = self.tpm_max.unwrap_or(DEFAULT_TPM_MAX);
        if tpm_max == 0 {
            return Err(ConfigError::Invalid {
                name: "TPM_MAX".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        let llm_concurrency = self.llm_concurrency.unwrap_or(DEFAULT_LLM_CONCURRENCY);
        if llm_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "LLM_CONCURRENCY".to_string(),
                reason: "must be > 0".to_string(),
            });
        }

        Ok(EngineConfig {
            provider: self.provider.unwrap_or_else(|| "openai".to_string()),
            api_key,
            base_url: self.base_url,
            model: self.model.unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            max_output_tokens: self.max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            temperature: self.temperature.unwrap_or(0.2),
            rpm_max,
            tpm_max,
            llm_concurrency,
            max_words_per_request: self
                .max_words_per_request
                .unwrap_or(DEFAULT_MAX_WORDS_PER_REQUEST),
            k_sem: self.k_sem.unwrap_or(DEFAULT_K_SEM),
            sparse_threshold: self.sparse_threshold.unwrap_or(DEFAULT_SPARSE_THRESHOLD),
            max_retrieved: self.max_retrieved.unwrap_or(DEFAULT_MAX_RETRIEVED),
            large_threshold: self.large_threshold.unwrap_or(DEFAULT_LARGE_THRESHOLD),
            max_review_iterations: self
                .max_review_iterations
                .unwrap_or(DEFAULT_MAX_REVIEW_ITERATIONS),
            job_deadline: self
                .job_deadline
                .unwrap_or(Duration::from_secs(DEFAULT_JOB_DEADLINE_SECS)),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            max_active_jobs: self.max_active_jobs.unwrap_or(DEFAULT_MAX_ACTIVE_JOBS),
            data_dir: self.data_dir.unwrap_or_else(|| PathBuf::from("data")),
            vector_url: self
                .vector_url
                .unwrap_or_else(|| "http://127.0.0.1:6333".to_string()),
            prompt_dir: self.prompt_dir,
            institutions: self.institutions.unwrap_or_else(|| {
                DEFAULT_INSTITUTIONS.iter().map(ToString::to_string).collect()
            }),
            persons: self
                .persons
                .unwrap_or_else(|| DEFAULT_PERSONS.iter().map(ToString::to_string).collect()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = EngineConfig::builder()
            .api_key("test-key")
            .build()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(config.provider, "openai");
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.rpm_max, DEFAULT_RPM_MAX);
        assert_eq!(config.k_sem, DEFAULT_K_SEM);
        assert_eq!(config.sparse_threshold, DEFAULT_SPARSE_THRESHOLD);
        assert_eq!(config.max_retrieved, DEFAULT_MAX_RETRIEVED);
        assert_eq!(config.job_deadline, Duration::from_secs(420));
        assert!(!config.institutions.is_empty());
    }

    #[test]
    fn test_builder_missing_api_key() {
        let result = EngineConfig::builder().build();
        assert!(matches!(result, Err(ConfigError::ApiKeyMissing)));
    }

    #[test]
    fn test_builder_custom_values() {
        let config = EngineConfig::builder()
            .api_key("key")
            .model("gemini-2.5-pro")
            .rpm_max(4)
            .tpm_max(100_000)
            .llm_concurrency(2)
            .large_threshold(10)
            .job_deadline(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.rpm_max, 4);
        assert_eq!(config.tpm_max, 100_000);
        assert_eq!(config.llm_concurrency, 2);
        assert_eq!(config.large_threshold, 10);
        assert_eq!(config.job_deadline, Duration::from_secs(60));
    }

    #[test]
    fn test_builder_rejects_zero_budgets() {
        let result = EngineConfig::builder().api_key("k").rpm_max(0).build();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        let result = EngineConfig::builder().api_key("k").llm_concurrency(0).build();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
