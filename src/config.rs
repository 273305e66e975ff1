//! Configuration types for invoice extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Every knob that used to be a constant
//! (model id, sampling temperature, truncation length, output file names)
//! lives here, and the OCR engine and text generator can be injected so the
//! pipeline runs against fakes in tests.

use crate::error::ExtractError;
use crate::pipeline::llm::TextGenerator;
use crate::pipeline::ocr::OcrEngine;
use crate::progress::ProgressCallback;
use crate::prompts::RAW_TEXT_PLACEHOLDER;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default JSON output file name.
pub const DEFAULT_JSON_FILE: &str = "invoice_extracted_data.json";

/// Default CSV output file name.
pub const DEFAULT_CSV_FILE: &str = "invoice_extracted_data.csv";

/// Default model when a provider is named without one: hosted Mistral-7B-Instruct.
pub const DEFAULT_MODEL: &str = "open-mistral-7b";

/// Configuration for one invoice extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use invoice2json::{DecodingMode, ExtractionConfig};
///
/// let config = ExtractionConfig::builder()
///     .decoding(DecodingMode::Greedy)
///     .max_tokens(800)
///     .output_dir("out")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// LLM model identifier, e.g. "open-mistral-7b", "gpt-4.1-nano".
    /// If None, uses [`DEFAULT_MODEL`] or the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "mistral", "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed text generator. Takes precedence over every provider
    /// setting; used to plug in fakes or non-chat backends.
    pub generator: Option<Arc<dyn TextGenerator>>,

    /// Pre-constructed OCR engine. If None, the built-in ocrs engine is used.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Path to the ocrs text-detection model. If None, auto-downloaded.
    pub detection_model: Option<PathBuf>,

    /// Path to the ocrs text-recognition model. If None, auto-downloaded.
    pub recognition_model: Option<PathBuf>,

    /// Sampling strategy. Default: sampled at temperature 0.5.
    pub decoding: DecodingMode,

    /// Maximum tokens the model may generate. Default: 500.
    pub max_tokens: usize,

    /// Prompt length cap in tokens; longer prompts lose their tail. Default: 2048.
    pub max_input_tokens: usize,

    /// How strictly the model output must be JSON. Default: [`JsonMode::FirstObject`].
    pub json_mode: JsonMode,

    /// Custom prompt template containing `{raw_text}`. If None, uses the built-in one.
    pub prompt_template: Option<String>,

    /// Maximum retry attempts on a transient API failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-LLM-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Drop OCR words whose confidence is below this value. Default: None (keep all).
    ///
    /// Words without a confidence score are always kept.
    pub min_confidence: Option<f32>,

    /// Directory the JSON and CSV files are written to. Default: ".".
    pub output_dir: PathBuf,

    /// JSON output file name. Default: [`DEFAULT_JSON_FILE`].
    pub json_file_name: String,

    /// CSV output file name. Default: [`DEFAULT_CSV_FILE`].
    pub csv_file_name: String,

    /// Optional progress callback for stage events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            generator: None,
            ocr_engine: None,
            detection_model: None,
            recognition_model: None,
            decoding: DecodingMode::default(),
            max_tokens: 500,
            max_input_tokens: 2048,
            json_mode: JsonMode::default(),
            prompt_template: None,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            min_confidence: None,
            output_dir: PathBuf::from("."),
            json_file_name: DEFAULT_JSON_FILE.to_string(),
            csv_file_name: DEFAULT_CSV_FILE.to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("generator", &self.generator.as_ref().map(|_| "<dyn TextGenerator>"))
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|_| "<dyn OcrEngine>"))
            .field("detection_model", &self.detection_model)
            .field("recognition_model", &self.recognition_model)
            .field("decoding", &self.decoding)
            .field("max_tokens", &self.max_tokens)
            .field("max_input_tokens", &self.max_input_tokens)
            .field("json_mode", &self.json_mode)
            .field("max_retries", &self.max_retries)
            .field("min_confidence", &self.min_confidence)
            .field("output_dir", &self.output_dir)
            .field("json_file_name", &self.json_file_name)
            .field("csv_file_name", &self.csv_file_name)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Full path of the JSON output file.
    pub fn json_path(&self) -> PathBuf {
        self.output_dir.join(&self.json_file_name)
    }

    /// Full path of the CSV output file.
    pub fn csv_path(&self) -> PathBuf {
        self.output_dir.join(&self.csv_file_name)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.config.generator = Some(generator);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn detection_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.detection_model = Some(path.into());
        self
    }

    pub fn recognition_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.recognition_model = Some(path.into());
        self
    }

    pub fn decoding(mut self, mode: DecodingMode) -> Self {
        self.config.decoding = match mode {
            DecodingMode::Sampled { temperature } => DecodingMode::Sampled {
                temperature: temperature.clamp(0.0, 2.0),
            },
            greedy => greedy,
        };
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_input_tokens(mut self, n: usize) -> Self {
        self.config.max_input_tokens = n;
        self
    }

    pub fn json_mode(mut self, mode: JsonMode) -> Self {
        self.config.json_mode = mode;
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn min_confidence(mut self, threshold: f32) -> Self {
        self.config.min_confidence = Some(threshold);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn json_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.json_file_name = name.into();
        self
    }

    pub fn csv_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.csv_file_name = name.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.max_input_tokens < 64 {
            return Err(ExtractError::InvalidConfig(format!(
                "max_input_tokens must be ≥ 64, got {}",
                c.max_input_tokens
            )));
        }
        if let Some(t) = c.min_confidence {
            if !(0.0..=1.0).contains(&t) {
                return Err(ExtractError::InvalidConfig(format!(
                    "min_confidence must be within 0.0–1.0, got {t}"
                )));
            }
        }
        if let Some(ref tpl) = c.prompt_template {
            if !tpl.contains(RAW_TEXT_PLACEHOLDER) {
                return Err(ExtractError::InvalidConfig(format!(
                    "prompt template must contain the {RAW_TEXT_PLACEHOLDER} placeholder"
                )));
            }
        }
        for name in [&c.json_file_name, &c.csv_file_name] {
            validate_file_name(name)?;
        }
        if c.json_file_name == c.csv_file_name {
            return Err(ExtractError::InvalidConfig(
                "JSON and CSV outputs must have different file names".into(),
            ));
        }
        Ok(self.config)
    }
}

fn validate_file_name(name: &str) -> Result<(), ExtractError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(ExtractError::InvalidConfig(format!(
            "output file name must be a bare file name, got '{name}'"
        )));
    }
    Ok(())
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Decoding strategy for the structuring model.
///
/// Sampling makes the output differ between runs for the same invoice, and
/// downstream JSON parsing depends on the exact generated syntax. Use
/// [`DecodingMode::Greedy`] when reproducible runs matter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DecodingMode {
    /// Always pick the most likely token (temperature 0).
    Greedy,
    /// Sample at the given temperature (0.0–2.0).
    Sampled { temperature: f32 },
}

impl Default for DecodingMode {
    fn default() -> Self {
        DecodingMode::Sampled { temperature: 0.5 }
    }
}

impl DecodingMode {
    /// Temperature to send to the provider.
    pub fn temperature(&self) -> f32 {
        match self {
            DecodingMode::Greedy => 0.0,
            DecodingMode::Sampled { temperature } => *temperature,
        }
    }
}

/// How the model's output is turned into JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JsonMode {
    /// The whole (trimmed) output must be a JSON document.
    Strict,
    /// Strip code fences and pull the first JSON object or array out of
    /// surrounding prose. (default)
    #[default]
    FirstObject,
}
