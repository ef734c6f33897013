//! `OpenAI`-compatible provider implementation using the `async-openai` crate.
//!
//! Works against any API following the `OpenAI` chat completion spec
//! (`OpenAI` itself, the Gemini compatibility surface, or local proxies)
//! via the base URL override in [`EngineConfig`].

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
};
use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::error::LlmError;
use crate::llm::provider::{GenerationRequest, GenerationResponse, LlmProvider, TokenUsage};

/// `OpenAI`-compatible LLM provider.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiProvider {
    /// Creates a new provider from engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(&config.api_key);

        if let Some(ref base_url) = config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
        }
    }

    /// Builds an `OpenAI` chat completion request from our generic request.
    fn build_request(&self, request: &GenerationRequest) -> CreateChatCompletionRequest {
        CreateChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: ChatCompletionRequestUserMessageContent::Text(request.prompt.clone()),
                    name: None,
                },
            )],
            temperature: Some(request.temperature),
            max_completion_tokens: Some(request.max_output_tokens),
            ..Default::default()
        }
    }

    /// Classifies an SDK error into the closed [`LlmError`] set.
    fn classify(err: OpenAIError) -> LlmError {
        match err {
            OpenAIError::ApiError(api) => {
                let kind = api.r#type.clone().unwrap_or_default();
                let haystack = format!("{kind} {}", api.message).to_lowercase();
                if haystack.contains("rate limit")
                    || haystack.contains("rate_limit")
                    || haystack.contains("quota")
                    || haystack.contains("resource_exhausted")
                {
                    LlmError::RateLimited { retry_after: None }
                } else if haystack.contains("api key")
                    || haystack.contains("api_key")
                    || haystack.contains("authentication")
                    || haystack.contains("unauthorized")
                    || haystack.contains("permission")
                {
                    LlmError::AuthFailure
                } else if haystack.contains("invalid")
                    || haystack.contains("context length")
                    || haystack.contains("too long")
                {
                    LlmError::InvalidRequest {
                        message: api.message,
                    }
                } else {
                    LlmError::Transient {
                        message: api.message,
                    }
                }
            }
            OpenAIError::InvalidArgument(message) => LlmError::InvalidRequest { message },
            other => LlmError::Transient {
                message: other.to_string(),
            },
        }
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<async-openai::Client>")
            .field("model", &self.model)
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let openai_request = self.build_request(request);

        let response = self
            .client
            .chat()
            .create(openai_request)
            .await
            .map_err(Self::classify)?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        let usage = response
            .usage
            .map_or_else(TokenUsage::default, |u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });

        Ok(GenerationResponse { text, usage })
    }
}
