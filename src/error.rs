//! Error types for the invoice2json library.
//!
//! Three types reflect three distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal**: the run cannot proceed at all (missing
//!   image, OCR model not loadable, provider not configured, model call
//!   still failing after all retries, output not writable). Returned as
//!   `Err(ExtractError)` from the top-level `extract*` functions.
//!
//! * [`StructuringFailure`] — **Non-fatal**: the model answered, but not with
//!   usable JSON. Stored inside
//!   [`crate::output::ExtractionOutcome::Unstructured`] and persisted as the
//!   fallback record instead of aborting the run.
//!
//! * [`OcrError`] — raised by an [`crate::pipeline::ocr::OcrEngine`]
//!   implementation; the pipeline wraps it into [`ExtractError::OcrFailed`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the invoice2json library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a recognised image format.
    #[error("File is not a supported image: '{path}'\nFirst bytes: {magic:?}")]
    NotAnImage { path: PathBuf, magic: [u8; 4] },

    /// The image header was recognised but the pixel data could not be decoded.
    #[error("Failed to decode image '{path}': {detail}")]
    ImageDecode { path: PathBuf, detail: String },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The OCR detection/recognition models could not be located or loaded.
    #[error(
        "Failed to load OCR models: {0}\n\n\
The ocrs models are normally downloaded automatically on first run.\n\
If the auto-download failed, you can:\n\
  • Check your internet connection and try again.\n\
  • Set OCRS_DETECTION_MODEL / OCRS_RECOGNITION_MODEL to existing .rten files.\n"
    )]
    OcrModelLoad(String),

    /// The OCR engine failed while processing the image.
    #[error("OCR failed for '{path}': {source}")]
    OcrFailed {
        path: PathBuf,
        #[source]
        source: OcrError,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every generation attempt failed (auth, network, timeout…).
    #[error("LLM call failed after {retries} retries: {detail}")]
    LlmFailed { retries: u32, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write one of the output files.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The result could not be rendered as CSV.
    #[error("Failed to render CSV: {0}")]
    CsvRender(#[from] csv::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors reported by an OCR engine implementation.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine could not prepare the image (size, colour layout…).
    #[error("image preparation failed: {0}")]
    Prepare(String),

    /// Word detection or line recognition failed.
    #[error("recognition failed: {0}")]
    Recognition(String),
}

/// A single failed generation call. Retried by the structuring stage;
/// once retries run out it becomes [`ExtractError::LlmFailed`].
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The call did not finish within `api_timeout_secs`.
    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider returned an error (HTTP status, rate limit, auth…).
    #[error("LLM API error: {0}")]
    Provider(String),
}

/// Why the structuring stage fell back to the raw-text record.
///
/// Never aborts the run; see [`crate::output::ExtractionOutcome`].
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum StructuringFailure {
    /// The model's output is not valid JSON.
    #[error("model output is not valid JSON: {detail}")]
    InvalidJson { detail: String },

    /// The model returned an empty completion.
    #[error("model returned an empty response")]
    EmptyResponse,
}
