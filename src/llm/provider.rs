//! Pluggable LLM provider trait.
//!
//! Implementations translate the provider-agnostic request/response pair
//! into vendor SDK calls. All orchestration logic stays decoupled from
//! any particular LLM vendor; errors surface as the closed
//! [`LlmError`](crate::error::LlmError) set.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::error::LlmError;
use crate::llm::providers::OpenAiProvider;

/// A single text-generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Full prompt text (the prompt builders produce one self-contained
    /// message; no multi-turn state is kept).
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_output_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Token usage statistics from a completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

/// A completed generation.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    /// Generated text.
    pub text: String,
    /// Token usage reported by the provider.
    pub usage: TokenUsage,
}

/// Trait for LLM provider backends.
///
/// Implementations handle the transport layer for a specific provider
/// while presenting a uniform interface. Retries live in
/// [`LlmClient`](crate::llm::LlmClient), never here.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`).
    fn name(&self) -> &'static str;

    /// Executes a generation request.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] classified into the closed error-kind set.
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Creates an [`LlmProvider`] based on the configured provider name.
///
/// # Supported Providers
///
/// - `"openai"` (default) — OpenAI-compatible APIs via `async-openai`,
///   including the Gemini OpenAI-compatibility surface through the
///   base-URL override.
///
/// # Errors
///
/// Returns [`LlmError::UnsupportedProvider`] for unknown provider names.
pub fn create_provider(config: &EngineConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config))),
        other => Err(LlmError::UnsupportedProvider {
            name: other.to_string(),
        }),
    }
}
