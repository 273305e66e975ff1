//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through OCR, structuring and persistence.
//! Callers can forward them to a terminal spinner, a log, or a job record
//! without the library knowing how the host application reports progress.
//!
//! # Example
//!
//! ```rust
//! use invoice2json::{ExtractionConfig, ExtractionProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ExtractionProgressCallback for Printer {
//!     fn on_stage_complete(&self, stage: Stage, detail: &str) {
//!         eprintln!("{stage} done: {detail}");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

/// The three pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Stage {
    Ocr,
    Structuring,
    Persistence,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Ocr => "OCR",
            Stage::Structuring => "Structuring",
            Stage::Persistence => "Persistence",
        })
    }
}

/// Called by the pipeline as it moves through each stage.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called just before a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finishes.
    ///
    /// # Arguments
    /// * `stage`  — the finished stage
    /// * `detail` — short human-readable summary (word count, file names…)
    fn on_stage_complete(&self, stage: Stage, detail: &str) {
        let _ = (stage, detail);
    }

    /// Called when the model output could not be structured and the
    /// fallback record is used instead.
    fn on_structuring_fallback(&self, reason: &str) {
        let _ = reason;
    }

    /// Called once after the last stage.
    ///
    /// # Arguments
    /// * `structured` — `false` when the fallback record was produced
    fn on_extraction_complete(&self, structured: bool) {
        let _ = structured;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// Equivalent to leaving `progress_callback` unset, which skips the calls
/// entirely.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
