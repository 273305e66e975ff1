//! CLI binary for invoice2json.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use invoice2json::{
    extract_text, extract_to_files, render_json, DecodingMode, ExtractionConfig,
    ExtractionOutcome, ExtractionProgressCallback, JsonMode, ProgressCallback, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one spinner whose prefix follows the current
/// stage, plus a log line as each stage finishes.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(SPINNER_TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening image…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message(match stage {
            Stage::Ocr => "reading words…",
            Stage::Structuring => "asking the model for JSON…",
            Stage::Persistence => "writing files…",
        });
    }

    fn on_stage_complete(&self, stage: Stage, detail: &str) {
        self.bar
            .println(format!("  {} {:<12} {}", green("✓"), stage, dim(detail)));
    }

    fn on_structuring_fallback(&self, reason: &str) {
        self.bar
            .println(format!("  {} {}", yellow("⚠"), yellow(reason)));
    }

    fn on_extraction_complete(&self, _structured: bool) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract to ./invoice_extracted_data.json and .csv
  invoice2json invoice.png

  # Write into another directory with custom names
  invoice2json scan.jpg --output-dir out --json-file inv.json --csv-file inv.csv

  # Reproducible output (greedy decoding, whole reply must be JSON)
  invoice2json --greedy --strict-json invoice.png

  # Another provider / model
  invoice2json --provider openai --model gpt-4.1-nano invoice.png

  # From a URL
  invoice2json https://example.com/invoices/0042.png

  # OCR only, no API key needed
  invoice2json --text-only invoice.png

ENVIRONMENT VARIABLES:
  MISTRAL_API_KEY         Mistral API key (default provider, open-mistral-7b)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (mistral, openai, anthropic, ollama, …)
  EDGEQUAKE_MODEL         Override model ID
  OCRS_DETECTION_MODEL    Existing text-detection .rten model, skips download
  OCRS_RECOGNITION_MODEL  Existing text-recognition .rten model, skips download
  OCRS_AUTO_CACHE_DIR     Override the OCR model cache directory

SETUP:
  1. Set API key:     export MISTRAL_API_KEY=...
  2. Extract:         invoice2json invoice.png

  The OCR models (~12 MB) are downloaded on first run and cached in
  ~/.cache/invoice2json/ocrs-models-1/.
"#;

/// Extract structured invoice data from images using OCR and an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "invoice2json",
    version,
    about = "Extract structured invoice data from images using OCR and an LLM",
    long_about = "Read an invoice image (local file or URL) with a pure-Rust OCR engine, ask an \
LLM to lay the text out as JSON, and save the result as pretty JSON plus a two-column CSV. \
Supports Mistral, OpenAI, Anthropic, Gemini, Ollama and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local invoice image path or HTTP/HTTPS URL.
    input: String,

    /// Directory the JSON and CSV files are written to.
    #[arg(short, long, env = "INVOICE2JSON_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// JSON output file name.
    #[arg(long, env = "INVOICE2JSON_JSON_FILE", default_value = "invoice_extracted_data.json")]
    json_file: String,

    /// CSV output file name.
    #[arg(long, env = "INVOICE2JSON_CSV_FILE", default_value = "invoice_extracted_data.csv")]
    csv_file: String,

    /// LLM model ID (e.g. open-mistral-7b, gpt-4.1-nano).
    #[arg(long, env = "INVOICE2JSON_MODEL")]
    model: Option<String>,

    /// LLM provider: mistral, openai, anthropic, gemini, ollama.
    #[arg(
        long,
        env = "INVOICE2JSON_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set \
          (MISTRAL_API_KEY is preferred)."
    )]
    provider: Option<String>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "INVOICE2JSON_TEMPERATURE", default_value_t = 0.5)]
    temperature: f32,

    /// Greedy decoding (temperature 0) for reproducible output.
    #[arg(long, env = "INVOICE2JSON_GREEDY", conflicts_with = "temperature")]
    greedy: bool,

    /// Max tokens the model may generate.
    #[arg(long, env = "INVOICE2JSON_MAX_TOKENS", default_value_t = 500)]
    max_tokens: usize,

    /// Prompt length cap in tokens; longer prompts lose their tail.
    #[arg(long, env = "INVOICE2JSON_MAX_INPUT_TOKENS", default_value_t = 2048)]
    max_input_tokens: usize,

    /// Require the whole model reply to be JSON (no fences or prose).
    #[arg(long, env = "INVOICE2JSON_STRICT_JSON")]
    strict_json: bool,

    /// Text file with a custom prompt containing `{raw_text}`.
    #[arg(long, env = "INVOICE2JSON_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Text-detection .rten model (skips download).
    #[arg(long, env = "INVOICE2JSON_DETECTION_MODEL")]
    detection_model: Option<PathBuf>,

    /// Text-recognition .rten model (skips download).
    #[arg(long, env = "INVOICE2JSON_RECOGNITION_MODEL")]
    recognition_model: Option<PathBuf>,

    /// Retries on LLM failure.
    #[arg(long, env = "INVOICE2JSON_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "INVOICE2JSON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// LLM call timeout in seconds.
    #[arg(long, env = "INVOICE2JSON_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Print the OCR text only; no model call, no files written.
    #[arg(long, env = "INVOICE2JSON_TEXT_ONLY")]
    text_only: bool,

    /// Disable progress spinner.
    #[arg(long, env = "INVOICE2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except the JSON and errors.
    #[arg(short, long, env = "INVOICE2JSON_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Ensure OCR models are available ──────────────────────────────────
    // First run downloads both models into the cache; later runs only check
    // that the files exist.
    #[cfg(feature = "ocrs")]
    if cli.detection_model.is_none() || cli.recognition_model.is_none() {
        ensure_ocr_models(cli.quiet)?;
    }

    // ── Text-only mode ───────────────────────────────────────────────────
    if cli.text_only {
        let config = build_config(&cli, None).await?;
        let text = extract_text(&cli.input, &config)
            .await
            .context("OCR failed")?;
        println!("{text}");
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let written = extract_to_files(&cli.input, &config)
        .await
        .context("Extraction failed")?;
    let output = &written.output;

    if !cli.quiet {
        println!("{}\n{}\n", bold("Extracted Text:"), output.text);
    }
    if let ExtractionOutcome::Unstructured { reason, .. } = &output.outcome {
        eprintln!(
            "{} the model did not return valid JSON ({reason}); saved the raw text instead.",
            yellow("⚠ Warning:"),
        );
    }
    if !cli.quiet {
        println!("{}", bold("Final Structured JSON:"));
    }
    println!("{}", render_json(&output.outcome.to_json()));

    if !cli.quiet {
        eprintln!(
            "\n{} Extraction complete! Data saved to {} and {}",
            green("✔"),
            bold(&written.json_path.display().to_string()),
            bold(&written.csv_path.display().to_string()),
        );
        eprintln!(
            "   {} words  /  {} tokens in  /  {} tokens out  —  {}ms total",
            dim(&output.stats.ocr_words.to_string()),
            dim(&output.stats.input_tokens.to_string()),
            dim(&output.stats.output_tokens.to_string()),
            output.stats.total_duration_ms,
        );
    }

    Ok(())
}

/// Download the OCR models on first use, with a byte progress bar.
#[cfg(feature = "ocrs")]
fn ensure_ocr_models(quiet: bool) -> Result<()> {
    if ocrs_auto::are_models_cached() {
        return Ok(());
    }
    if quiet {
        ocrs_auto::ensure_models(None).context("Failed to download OCR models")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER_TICKS),
    );
    dl_bar.set_prefix("OCR models");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    // Runs before any async work, so blocking here is fine.
    ocrs_auto::ensure_models(Some(&|downloaded, total| {
        if let Some(t) = total {
            if bar.length().unwrap_or(0) != t {
                bar.set_length(t);
            }
        }
        bar.set_position(downloaded);
    }))
    .context("Failed to download OCR models")?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let decoding = if cli.greedy {
        DecodingMode::Greedy
    } else {
        DecodingMode::Sampled {
            temperature: cli.temperature,
        }
    };

    let mut builder = ExtractionConfig::builder()
        .decoding(decoding)
        .max_tokens(cli.max_tokens)
        .max_input_tokens(cli.max_input_tokens)
        .json_mode(if cli.strict_json {
            JsonMode::Strict
        } else {
            JsonMode::FirstObject
        })
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .output_dir(&cli.output_dir)
        .json_file_name(&cli.json_file)
        .csv_file_name(&cli.csv_file);

    if let Some(ref path) = cli.prompt_file {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt_template(template);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = cli.detection_model {
        builder = builder.detection_model(path);
    }
    if let Some(ref path) = cli.recognition_model {
        builder = builder.recognition_model(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
