//! Model calls: the [`CompletionBackend`] seam and its edgequake-llm
//! implementation.
//!
//! The extraction and summary stages only ever talk to a
//! `dyn CompletionBackend`. Production wires in [`LlmBackend`], which turns a
//! [`CompletionRequest`] into `ChatMessage`s for whichever provider
//! edgequake-llm resolved; tests wire in scripted fakes.
//!
//! Every call is wrapped in `tokio::time::timeout` so a hung upstream fails
//! the page instead of stalling the task forever.

use crate::config::SummarizerConfig;
use crate::error::{BackendError, ConfigError};
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// One prompt/response exchange with the model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Optional system role message.
    pub system: Option<String>,
    /// User text.
    pub text: String,
    /// Optional page image sent alongside the text.
    pub image: Option<EncodedImage>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Anything that can answer a [`CompletionRequest`].
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Return the model's text reply (possibly empty).
    async fn complete(&self, request: CompletionRequest) -> Result<String, BackendError>;
}

/// [`CompletionBackend`] backed by an edgequake-llm provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
    detail: String,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout: Duration, detail: impl Into<String>) -> Self {
        Self {
            provider,
            timeout,
            detail: detail.into(),
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub fn from_config(config: &SummarizerConfig) -> Result<Self, ConfigError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(
            provider,
            Duration::from_secs(config.api_timeout_secs),
            config.vision_detail.clone(),
        ))
    }

    fn build_messages(&self, request: &CompletionRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage::system(system));
        }
        match &request.image {
            Some(image) => {
                let data = ImageData::new(image.data.clone(), image.mime_type)
                    .with_detail(self.detail.as_str());
                messages.push(ChatMessage::user_with_images(&request.text, vec![data]));
            }
            None => messages.push(ChatMessage::user(&request.text)),
        }
        messages
    }
}

#[async_trait]
impl CompletionBackend for LlmBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<String, BackendError> {
        let messages = self.build_messages(&request);
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let start = Instant::now();
        let call = self.provider.chat(&messages, Some(&options));
        let response = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                return Err(BackendError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) => return Err(classify(format!("{e}"))),
            Ok(Ok(response)) => response,
        };

        debug!(
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "completion finished"
        );
        Ok(response.content)
    }
}

/// Sort a provider error message into the retryable rate-limit class or a
/// plain API error.
pub fn classify(message: String) -> BackendError {
    let lower = message.to_lowercase();
    let rate_limited = ["rate limit", "rate_limit", "ratelimit", "429", "too many requests"]
        .iter()
        .any(|needle| lower.contains(needle));
    if rate_limited {
        BackendError::RateLimited(message)
    } else {
        BackendError::Api(message)
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ConfigError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ConfigError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. a provider injected through the config
/// 2. `provider_name` (+ model) from the config
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
/// 4. OpenAI when `OPENAI_API_KEY` is present
/// 5. whatever `ProviderFactory::from_env` detects
pub fn resolve_provider(config: &SummarizerConfig) -> Result<Arc<dyn LLMProvider>, ConfigError> {
    if let Some(provider) = &config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(name) = &config.provider_name {
        return create_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            return create_provider("openai", config.model_or_default());
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ConfigError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {e}"
            ),
        })?;
    Ok(llm_provider)
}
