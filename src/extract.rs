//! Extraction entry points.
//!
//! [`extract`] runs OCR and structuring and returns the result in memory;
//! [`extract_to_files`] additionally writes the JSON and CSV files. The two
//! halves are also exposed on their own: [`extract_text`] (OCR only, no API
//! key needed) and [`structure_text`] (model only, for text obtained
//! elsewhere).

use crate::config::{ExtractionConfig, DEFAULT_MODEL};
use crate::error::ExtractError;
use crate::output::{ExtractionOutcome, ExtractionOutput, ExtractionStats, WrittenOutputs};
use crate::pipeline::llm::{ProviderGenerator, TextGenerator};
use crate::pipeline::ocr::{self, OcrEngine};
use crate::pipeline::{input, persist, structure};
use crate::progress::Stage;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Extract structured data from an invoice image (path or URL).
///
/// Nothing is written to disk; see [`extract_to_files`] for that.
///
/// # Returns
/// `Ok(ExtractionOutput)` whenever OCR succeeded, even if the model output
/// could not be structured (check `output.outcome`).
///
/// # Errors
/// Returns `Err(ExtractError)` only for fatal errors:
/// - File not found / not an image / download failed
/// - OCR models not loadable, OCR engine failure
/// - No LLM provider configured, or the model call failing after all retries
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let output = run_pipeline(input_str.as_ref(), config).await?;
    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(output.outcome.is_structured());
    }
    Ok(output)
}

/// Run the full pipeline and write both output files.
///
/// The files land in `config.output_dir` under `config.json_file_name` and
/// `config.csv_file_name`, replacing any previous run. The fallback record
/// is written like any other result; on a fatal error nothing is written
/// and earlier files stay as they were.
pub async fn extract_to_files(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<WrittenOutputs, ExtractError> {
    let total_start = Instant::now();
    let mut output = run_pipeline(input_str.as_ref(), config).await?;

    start_stage(config, Stage::Persistence);
    let json_path = config.json_path();
    let csv_path = config.csv_path();
    let value = output.outcome.to_json();
    persist::write_json(&json_path, &value).await?;
    persist::write_csv(&csv_path, &value).await?;
    info!(
        "Wrote {} and {}",
        json_path.display(),
        csv_path.display()
    );
    complete_stage(
        config,
        Stage::Persistence,
        &format!("{}, {}", config.json_file_name, config.csv_file_name),
    );

    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(output.outcome.is_structured());
    }

    Ok(WrittenOutputs {
        json_path,
        csv_path,
        output,
    })
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config))
}

/// Extract from image bytes held in memory.
///
/// The bytes are written to a managed temp file that is removed on return.
///
/// # Example
/// ```rust,no_run
/// use invoice2json::{extract_from_bytes, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("invoice.png")?;
/// let output = extract_from_bytes(&bytes, &ExtractionConfig::default()).await?;
/// println!("{}", output.outcome.to_json());
/// # Ok(())
/// # }
/// ```
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| ExtractError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| ExtractError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    // `tmp` is dropped (and the file deleted) when `extract` returns
    extract(&path, config).await
}

/// OCR only: return the normalised text of an invoice image.
///
/// Does not require an LLM provider or API key.
pub async fn extract_text(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<String, ExtractError> {
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let engine = resolve_ocr_engine(config).await?;
    let (text, _) = ocr_stage(engine, resolved.path(), config).await?;
    Ok(text)
}

/// Structuring only: turn already-extracted invoice text into JSON.
///
/// Fails when no model can be resolved or the model never answers; unusable
/// model output yields [`ExtractionOutcome::Unstructured`].
pub async fn structure_text(
    text: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, ExtractError> {
    let generator = resolve_generator(config)?;
    Ok(structure::structure(&generator, text, config).await?.outcome)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Input → OCR → structuring. Progress completion is left to the caller.
async fn run_pipeline(
    input_str: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let total_start = Instant::now();
    info!("Starting extraction: {}", input_str);

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;

    // ── Step 2: Resolve model and OCR engine ─────────────────────────────
    // Provider errors surface before the (slow) OCR model load.
    let generator = resolve_generator(config)?;
    let engine = resolve_ocr_engine(config).await?;

    // ── Step 3: OCR ──────────────────────────────────────────────────────
    let (text, mut stats) = ocr_stage(engine, resolved.path(), config).await?;

    // ── Step 4: Structuring ──────────────────────────────────────────────
    start_stage(config, Stage::Structuring);
    let result = structure::structure(&generator, &text, config).await?;
    complete_stage(
        config,
        Stage::Structuring,
        if result.outcome.is_structured() {
            "structured"
        } else {
            "fallback"
        },
    );

    stats.prompt_truncated = result.prompt_truncated;
    stats.input_tokens = result.input_tokens;
    stats.output_tokens = result.output_tokens;
    stats.retries = result.retries;
    stats.llm_duration_ms = result.duration_ms;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Extraction complete: {} in {}ms ({} words, {} → {} tokens)",
        if result.outcome.is_structured() {
            "structured"
        } else {
            "fallback"
        },
        stats.total_duration_ms,
        stats.ocr_words,
        stats.input_tokens,
        stats.output_tokens
    );

    Ok(ExtractionOutput {
        text,
        outcome: result.outcome,
        stats,
    })
}

/// Run OCR over `path` and normalise the result.
async fn ocr_stage(
    engine: Arc<dyn OcrEngine>,
    path: &Path,
    config: &ExtractionConfig,
) -> Result<(String, ExtractionStats), ExtractError> {
    start_stage(config, Stage::Ocr);
    let ocr_start = Instant::now();
    let engine_name = engine.name().to_string();

    let mut detection = ocr::run_ocr(engine, path).await?;
    if let Some(min) = config.min_confidence {
        let before = detection.word_count();
        detection.retain_confident(min);
        debug!(
            "Dropped {} words below confidence {}",
            before - detection.word_count(),
            min
        );
    }
    let text = ocr::extract_text(&detection);

    let stats = ExtractionStats {
        ocr_lines: detection.lines.len(),
        ocr_words: detection.word_count(),
        text_chars: text.chars().count(),
        ocr_duration_ms: ocr_start.elapsed().as_millis() as u64,
        ..Default::default()
    };
    info!(
        "{}: {} lines, {} words in {}ms",
        engine_name, stats.ocr_lines, stats.ocr_words, stats.ocr_duration_ms
    );
    complete_stage(config, Stage::Ocr, &format!("{} words", stats.ocr_words));

    Ok((text, stats))
}

fn start_stage(config: &ExtractionConfig, stage: Stage) {
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(stage);
    }
}

fn complete_stage(config: &ExtractionConfig, stage: Stage, detail: &str) {
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_complete(stage, detail);
    }
}

/// Use the configured OCR engine, or load the built-in one.
async fn resolve_ocr_engine(config: &ExtractionConfig) -> Result<Arc<dyn OcrEngine>, ExtractError> {
    match config.ocr_engine {
        Some(ref engine) => Ok(Arc::clone(engine)),
        None => load_builtin_engine(config).await,
    }
}

#[cfg(feature = "ocrs")]
async fn load_builtin_engine(config: &ExtractionConfig) -> Result<Arc<dyn OcrEngine>, ExtractError> {
    let detection = config.detection_model.clone();
    let recognition = config.recognition_model.clone();
    // Model download and load are blocking.
    let engine = tokio::task::spawn_blocking(move || {
        ocr::OcrsEngine::from_paths(detection.as_deref(), recognition.as_deref())
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("OCR model load task panicked: {e}")))??;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "ocrs"))]
async fn load_builtin_engine(_config: &ExtractionConfig) -> Result<Arc<dyn OcrEngine>, ExtractError> {
    Err(ExtractError::InvalidConfig(
        "no OCR engine configured: enable the `ocrs` feature or set `ocr_engine`".into(),
    ))
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the text generator, from most-specific to least-specific.
///
/// 1. **Generator** (`config.generator`) — used as-is.
/// 2. **Pre-built provider** (`config.provider`) — wrapped in a
///    [`ProviderGenerator`].
/// 3. **Named provider + model** (`config.provider_name`) — built by
///    [`ProviderFactory::create_llm_provider`], which reads the matching API
///    key from the environment. Model defaults to [`DEFAULT_MODEL`].
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **`MISTRAL_API_KEY`** — hosted Mistral with `config.model` or
///    [`DEFAULT_MODEL`].
/// 6. **Full auto-detection** (`ProviderFactory::from_env`).
fn resolve_generator(config: &ExtractionConfig) -> Result<Arc<dyn TextGenerator>, ExtractError> {
    if let Some(ref generator) = config.generator {
        return Ok(Arc::clone(generator));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref provider) = config.provider {
        let label = config.model.as_deref().unwrap_or("custom provider");
        return Ok(wrap(Arc::clone(provider), label));
    }

    if let Some(ref name) = config.provider_name {
        let provider = create_provider(name, model)?;
        return Ok(wrap(provider, &format!("{name}/{model}")));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            let provider = create_provider(&prov, &env_model)?;
            return Ok(wrap(provider, &format!("{prov}/{env_model}")));
        }
    }

    if let Ok(key) = std::env::var("MISTRAL_API_KEY") {
        if !key.is_empty() {
            let provider = create_provider("mistral", model)?;
            return Ok(wrap(provider, &format!("mistral/{model}")));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set MISTRAL_API_KEY, OPENAI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(wrap(llm_provider, "auto"))
}

fn wrap(provider: Arc<dyn LLMProvider>, label: &str) -> Arc<dyn TextGenerator> {
    debug!("Using LLM provider {}", label);
    Arc::new(ProviderGenerator::new(provider, label))
}
