//! LLM interaction: send the structuring prompt and collect the completion.
//!
//! The model sits behind the [`TextGenerator`] trait. [`ProviderGenerator`]
//! adapts any `edgequake_llm` chat provider; tests and alternative backends
//! implement the trait directly. Prompt text lives in [`crate::prompts`] and
//! response parsing in [`crate::pipeline::parse`], so this module only deals
//! with the call itself.
//!
//! ## Retry Strategy
//!
//! Transient provider failures (429, 5xx, timeouts) are retried with
//! exponential backoff: `retry_backoff_ms * 2^(attempt-1)`, i.e.
//! 500 ms → 1 s → 2 s with the defaults. The delay saturates instead of
//! overflowing for large retry counts. When every attempt fails the run
//! stops with [`ExtractError::LlmFailed`].

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, GenerationError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl GenerationRequest {
    /// Request for `prompt` using the decoding settings from `config`.
    pub fn from_config(prompt: impl Into<String>, config: &ExtractionConfig) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: config.decoding.temperature(),
            max_tokens: config.max_tokens,
        }
    }
}

/// A completed generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    /// Decoded completion text.
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Anything that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Backend/model label for logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;
}

/// [`TextGenerator`] backed by an `edgequake_llm` chat provider.
///
/// The prompt is sent as a single user message, matching an
/// instruction-tuned model prompted with the raw instruction.
pub struct ProviderGenerator {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl ProviderGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for ProviderGenerator {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let messages = vec![ChatMessage::user(request.prompt.as_str())];
        let options = build_options(request);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        Ok(Generation {
            text: response.content,
            input_tokens: response.prompt_tokens as usize,
            output_tokens: response.completion_tokens as usize,
        })
    }
}

/// Build `CompletionOptions` from a generation request.
fn build_options(request: &GenerationRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_tokens),
        ..Default::default()
    }
}

/// Successful result of [`generate_with_retry`].
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub generation: Generation,
    pub retries: u32,
    pub duration_ms: u64,
}

/// Delay before retry number `attempt` (1-based).
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Call the generator, retrying transient failures.
///
/// # Errors
/// [`ExtractError::LlmFailed`] with the last error once `max_retries`
/// retries have all failed.
pub async fn generate_with_retry(
    generator: &Arc<dyn TextGenerator>,
    request: &GenerationRequest,
    config: &ExtractionConfig,
) -> Result<GenerationAttempt, ExtractError> {
    let start = Instant::now();
    let call_timeout = Duration::from_secs(config.api_timeout_secs);
    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                generator.name(),
                attempt,
                config.max_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let outcome = match timeout(call_timeout, generator.generate(request)).await {
            Ok(r) => r,
            Err(_) => Err(GenerationError::Timeout {
                secs: config.api_timeout_secs,
            }),
        };

        match outcome {
            Ok(generation) => {
                let duration = start.elapsed();
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    generator.name(),
                    generation.input_tokens,
                    generation.output_tokens,
                    duration
                );
                return Ok(GenerationAttempt {
                    generation,
                    retries: attempt,
                    duration_ms: duration.as_millis() as u64,
                });
            }
            Err(e) => {
                let err_msg = e.to_string();
                warn!("{}: attempt {} failed — {}", generator.name(), attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
        }
    }

    Err(ExtractError::LlmFailed {
        retries: config.max_retries,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}
