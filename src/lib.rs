//! # invoice2json
//!
//! Extract structured data from scanned invoice images using OCR and an LLM.
//!
//! ## Why this crate?
//!
//! Invoices arrive as photos and scans with wildly different layouts, so
//! fixed templates or regex rules break on the first unfamiliar vendor.
//! Instead this crate reads every word with a pure-Rust OCR engine and asks
//! an instruction-tuned model to lay the text out as JSON (invoice number,
//! date, customer, line items, taxes, totals). When the model does not
//! answer with usable JSON the OCR text is kept in a fallback record, so a
//! run never loses what was read.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. OCR        detect + recognise words (ocrs, spawn_blocking)
//!  ├─ 3. Normalise  join words, collapse whitespace
//!  ├─ 4. Structure  prompt → open-mistral-7b / gpt / claude / … → JSON
//!  └─ 5. Persist    invoice_extracted_data.json + .csv
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice2json::{extract_to_files, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from MISTRAL_API_KEY / OPENAI_API_KEY / …
//!     let config = ExtractionConfig::default();
//!     let written = extract_to_files("invoice.png", &config).await?;
//!     println!("{}", written.output.outcome.to_json());
//!     eprintln!("wrote {} and {}",
//!         written.json_path.display(),
//!         written.csv_path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice2json` binary (clap + anyhow + tracing-subscriber) |
//! | `ocrs`  | on      | Built-in pure-Rust OCR engine with auto-downloaded models |
//!
//! Disable both to use only the library with your own [`OcrEngine`]:
//! ```toml
//! invoice2json = { version = "0.1", default-features = false }
//! ```
//!
//! ## Reproducibility
//!
//! Decoding defaults to sampling at temperature 0.5, so two runs on the same
//! invoice may produce different JSON. Pass [`DecodingMode::Greedy`] for
//! repeatable output.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DecodingMode, ExtractionConfig, ExtractionConfigBuilder, JsonMode};
pub use error::{ExtractError, GenerationError, OcrError, StructuringFailure};
pub use extract::{
    extract, extract_from_bytes, extract_sync, extract_text, extract_to_files, structure_text,
};
pub use output::{ExtractionOutcome, ExtractionOutput, ExtractionStats, WrittenOutputs};
pub use pipeline::llm::{Generation, GenerationRequest, ProviderGenerator, TextGenerator};
#[cfg(feature = "ocrs")]
pub use pipeline::ocr::OcrsEngine;
pub use pipeline::ocr::{BoundingBox, OcrDetection, OcrEngine, OcrLine, OcrWord};
pub use pipeline::persist::{render_csv, render_json, tabulate};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
