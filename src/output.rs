//! Result types returned by the extraction pipeline.

use crate::error::StructuringFailure;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// `error` field of the fallback record written when structuring fails.
pub const FALLBACK_ERROR_MESSAGE: &str = "Mistral AI failed to structure the data";

/// Outcome of the structuring stage.
///
/// The model's JSON is trusted as-is: no schema, no coercion. Use
/// [`ExtractionOutcome::to_json`] for the persisted form, which keeps the
/// historical `{"error", "raw_text"}` record for the fallback case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// The model output parsed as JSON; passed through unchanged.
    Structured(Value),
    /// The model output could not be used; the OCR text is kept instead.
    Unstructured {
        raw_text: String,
        reason: StructuringFailure,
    },
}

impl ExtractionOutcome {
    /// `true` for [`ExtractionOutcome::Structured`].
    pub fn is_structured(&self) -> bool {
        matches!(self, ExtractionOutcome::Structured(_))
    }

    /// Look up a top-level field of a structured result, e.g. `"Invoice Number"`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            ExtractionOutcome::Structured(v) => v.get(name),
            ExtractionOutcome::Unstructured { .. } => None,
        }
    }

    /// The JSON document written to disk.
    ///
    /// Structured results are returned verbatim; failures become
    /// `{"error": FALLBACK_ERROR_MESSAGE, "raw_text": <ocr text>}`.
    pub fn to_json(&self) -> Value {
        match self {
            ExtractionOutcome::Structured(v) => v.clone(),
            ExtractionOutcome::Unstructured { raw_text, .. } => json!({
                "error": FALLBACK_ERROR_MESSAGE,
                "raw_text": raw_text,
            }),
        }
    }
}

/// Timing and size figures for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Text lines reported by the OCR engine.
    pub ocr_lines: usize,
    /// Words kept after optional confidence filtering.
    pub ocr_words: usize,
    /// Characters in the normalised text.
    pub text_chars: usize,
    /// The prompt exceeded `max_input_tokens` and lost its tail.
    pub prompt_truncated: bool,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Retries spent on the generation call.
    pub retries: u32,
    pub ocr_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything produced by [`crate::extract`], before anything is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// Normalised OCR text that was sent to the model.
    pub text: String,
    /// Structured result or fallback.
    pub outcome: ExtractionOutcome,
    pub stats: ExtractionStats,
}

/// Paths written by [`crate::extract_to_files`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrittenOutputs {
    pub json_path: PathBuf,
    pub csv_path: PathBuf,
    pub output: ExtractionOutput,
}
