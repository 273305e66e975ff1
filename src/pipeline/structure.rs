//! Structuring stage: OCR text → prompt → model → JSON value or fallback.
//!
//! A reply that is empty or not JSON ends in
//! [`ExtractionOutcome::Unstructured`], which keeps the OCR text so nothing
//! extracted so far is lost. A model that never answers is fatal.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::output::ExtractionOutcome;
use crate::pipeline::llm::{generate_with_retry, GenerationRequest, TextGenerator};
use crate::pipeline::parse::parse_model_output;
use crate::prompts::{build_prompt, truncate_prompt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of the structuring stage plus its accounting figures.
#[derive(Debug, Clone)]
pub struct StructuringResult {
    pub outcome: ExtractionOutcome,
    pub prompt_truncated: bool,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u32,
    pub duration_ms: u64,
}

/// Ask `generator` to structure `raw_text`.
///
/// # Errors
/// [`ExtractError::LlmFailed`] when every generation attempt failed.
pub async fn structure(
    generator: &Arc<dyn TextGenerator>,
    raw_text: &str,
    config: &ExtractionConfig,
) -> Result<StructuringResult, ExtractError> {
    let prompt = build_prompt(config.prompt_template.as_deref(), raw_text);
    let (prompt, prompt_truncated) = truncate_prompt(&prompt, config.max_input_tokens);
    if prompt_truncated {
        warn!(
            "Prompt exceeds {} tokens; trailing invoice text was dropped",
            config.max_input_tokens
        );
    }
    debug!("Prompt: {} chars, sent to {}", prompt.len(), generator.name());

    let request = GenerationRequest::from_config(prompt, config);
    let attempt = generate_with_retry(generator, &request, config).await?;
    let generation = &attempt.generation;

    let outcome = match parse_model_output(&generation.text, config.json_mode) {
        Ok(value) => ExtractionOutcome::Structured(value),
        Err(reason) => {
            warn!("Could not structure invoice text: {reason}");
            if let Some(ref cb) = config.progress_callback {
                cb.on_structuring_fallback(&reason.to_string());
            }
            ExtractionOutcome::Unstructured {
                raw_text: raw_text.to_string(),
                reason,
            }
        }
    };

    Ok(StructuringResult {
        outcome,
        prompt_truncated,
        input_tokens: generation.input_tokens,
        output_tokens: generation.output_tokens,
        retries: attempt.retries,
        duration_ms: attempt.duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenerationError, StructuringFailure};
    use crate::pipeline::llm::Generation;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with a fixed completion and records the prompt it saw.
    struct CannedGenerator {
        reply: Result<String, GenerationError>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl CannedGenerator {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone().map(|text| Generation {
                text,
                input_tokens: 42,
                output_tokens: 7,
            })
        }
    }

    #[tokio::test]
    async fn valid_json_is_kept_unchanged() {
        let canned = CannedGenerator::replying(r#"{"Invoice Number": "INV-1"}"#);
        let generator: Arc<dyn TextGenerator> = canned.clone();
        let r = structure(&generator, "INV-1 100", &ExtractionConfig::default())
            .await
            .unwrap();

        assert_eq!(r.outcome, ExtractionOutcome::Structured(json!({"Invoice Number": "INV-1"})));
        assert_eq!((r.input_tokens, r.output_tokens), (42, 7));
        assert!(!r.prompt_truncated);

        let seen = canned.seen.lock().unwrap();
        assert!(seen[0].prompt.contains("INV-1 100"));
        assert_eq!(seen[0].temperature, 0.5);
        assert_eq!(seen[0].max_tokens, 500);
    }

    #[tokio::test]
    async fn refusal_falls_back_to_raw_text() {
        let generator: Arc<dyn TextGenerator> = CannedGenerator::replying("Sorry, I cannot help");
        let r = structure(&generator, "INV-1 100", &ExtractionConfig::default())
            .await
            .unwrap();

        assert_eq!(
            r.outcome.to_json(),
            json!({
                "error": "Mistral AI failed to structure the data",
                "raw_text": "INV-1 100"
            })
        );
        assert!(matches!(
            r.outcome,
            ExtractionOutcome::Unstructured {
                reason: StructuringFailure::InvalidJson { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn generation_failure_is_fatal() {
        let generator: Arc<dyn TextGenerator> = Arc::new(CannedGenerator {
            reply: Err(GenerationError::Provider("HTTP 401 invalid api key".into())),
            seen: Mutex::new(Vec::new()),
        });
        let config = ExtractionConfig::builder()
            .max_retries(0)
            .build()
            .unwrap();
        match structure(&generator, "text", &config).await {
            Err(ExtractError::LlmFailed { retries, detail }) => {
                assert_eq!(retries, 0);
                assert!(detail.contains("401"), "got: {detail}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_reply_falls_back() {
        let generator: Arc<dyn TextGenerator> = CannedGenerator::replying("   ");
        let r = structure(&generator, "INV-1", &ExtractionConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            r.outcome,
            ExtractionOutcome::Unstructured {
                reason: StructuringFailure::EmptyResponse,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn long_text_is_truncated() {
        let canned = CannedGenerator::replying("{}");
        let generator: Arc<dyn TextGenerator> = canned.clone();
        let config = ExtractionConfig::builder()
            .max_input_tokens(64)
            .build()
            .unwrap();
        let text = "word ".repeat(500);
        let r = structure(&generator, &text, &config).await.unwrap();

        assert!(r.prompt_truncated);
        let seen = canned.seen.lock().unwrap();
        assert_eq!(seen[0].prompt.chars().count(), 64 * crate::prompts::CHARS_PER_TOKEN);
        assert!(!seen[0].prompt.ends_with("Return structured JSON output."));
    }

    #[tokio::test]
    async fn strict_mode_rejects_fenced_output() {
        let generator: Arc<dyn TextGenerator> = CannedGenerator::replying("```json\n{\"a\": 1}\n```");
        let strict = ExtractionConfig::builder()
            .json_mode(crate::config::JsonMode::Strict)
            .build()
            .unwrap();
        assert!(!structure(&generator, "t", &strict).await.unwrap().outcome.is_structured());
        assert!(structure(&generator, "t", &ExtractionConfig::default())
            .await
            .unwrap()
            .outcome
            .is_structured());
    }
}
