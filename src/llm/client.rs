//! Retrying LLM client.
//!
//! Wraps a provider behind the rate gate and owns the only retry loop in
//! the system: `RateLimited` and `Transient` errors retry with
//! exponential backoff up to the configured cap, every attempt passing
//! through the gate, and cancellation cuts through waits, calls, and
//! backoff sleeps alike.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::LlmError;
use crate::llm::provider::{GenerationRequest, GenerationResponse, LlmProvider};
use crate::llm::rate_gate::RateGate;

/// Base delay for exponential retry backoff.
const BASE_BACKOFF: std::time::Duration = std::time::Duration::from_millis(500);

/// Rough prompt-token estimate: ~4 tokens per 3 words.
fn estimate_prompt_tokens(prompt: &str) -> u64 {
    let words = prompt.split_whitespace().count() as u64;
    words * 4 / 3
}

/// Rate-gated, retrying client over an [`LlmProvider`].
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    gate: Arc<RateGate>,
    max_retries: u32,
    max_output_tokens: u32,
    temperature: f32,
}

impl LlmClient {
    /// Creates a client from a provider, a shared gate, and configuration.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, gate: Arc<RateGate>, config: &EngineConfig) -> Self {
        Self {
            provider,
            gate,
            max_retries: config.max_retries,
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
        }
    }

    /// Generates text for `prompt`, waiting on the gate, retrying
    /// retryable failures, and honoring `cancel` at every suspension
    /// point.
    ///
    /// # Errors
    ///
    /// Returns the final [`LlmError`] once retries are exhausted, or
    /// [`LlmError::Cancelled`] when the token fires.
    pub async fn generate(
        &self,
        prompt: String,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse, LlmError> {
        let est_tokens = estimate_prompt_tokens(&prompt) + u64::from(self.max_output_tokens);
        let request = GenerationRequest {
            prompt,
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
        };

        let mut attempt: u32 = 0;
        loop {
            let permit = self.gate.acquire(est_tokens, cancel).await?;

            let result = tokio::select! {
                r = self.provider.generate(&request) => r,
                () = cancel.cancelled() => Err(LlmError::Cancelled),
            };

            match result {
                Ok(response) => {
                    permit.release(u64::from(response.usage.total_tokens));
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    drop(permit); // reclaim the token reservation
                    let backoff = match &e {
                        LlmError::RateLimited {
                            retry_after: Some(suggested),
                        } => *suggested,
                        _ => BASE_BACKOFF * 2u32.saturating_pow(attempt),
                    };
                    attempt += 1;
                    let backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
                    warn!(attempt, backoff_ms, error = %e, "retrying llm call");
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        () = cancel.cancelled() => return Err(LlmError::Cancelled),
                    }
                }
                Err(e) => {
                    drop(permit);
                    return Err(e);
                }
            }
        }
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider.name())
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
