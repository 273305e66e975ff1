//! Text extraction: image → line/word detections → normalised text.
//!
//! The engine is a trait so the pipeline can run against any backend. The
//! built-in [`OcrsEngine`] (feature `ocrs`) uses the pure-Rust
//! [ocrs](https://github.com/robertknight/ocrs) models; tests plug in fakes.
//!
//! Recognition is CPU-bound, so [`run_ocr`] decodes and recognises the image
//! on a `spawn_blocking` thread.

use crate::error::{ExtractError, OcrError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

// ── Detection types ──────────────────────────────────────────────────────────

/// Axis-aligned box around a word, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// One recognised word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    /// Recognition confidence in `0.0..=1.0`, when the engine reports one.
    pub confidence: Option<f32>,
    pub bbox: Option<BoundingBox>,
}

impl OcrWord {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
            bbox: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// One text line, words in reading order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub words: Vec<OcrWord>,
}

/// Everything the engine found in one image, lines in engine order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrDetection {
    pub lines: Vec<OcrLine>,
}

impl OcrDetection {
    pub fn word_count(&self) -> usize {
        self.lines.iter().map(|l| l.words.len()).sum()
    }

    /// Drop words scored below `min`. Words without a score are kept.
    pub fn retain_confident(&mut self, min: f32) {
        for line in &mut self.lines {
            line.words
                .retain(|w| w.confidence.map_or(true, |c| c >= min));
        }
    }
}

// ── Engine abstraction ───────────────────────────────────────────────────────

/// Abstraction over an OCR backend.
///
/// Implementations receive a decoded image and return every detected line.
/// They must be `Send + Sync`; the pipeline calls them from a blocking thread.
pub trait OcrEngine: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    fn recognize(&self, image: &image::DynamicImage) -> Result<OcrDetection, OcrError>;
}

// ── Text normalisation ───────────────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Join every word of every line, in engine order, with `"\n"`.
pub fn flatten_detection(detection: &OcrDetection) -> String {
    detection
        .lines
        .iter()
        .flat_map(|line| line.words.iter())
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse every whitespace run to a single space and trim.
pub fn normalize_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input, " ").trim().to_string()
}

/// The text handed to the structuring stage.
pub fn extract_text(detection: &OcrDetection) -> String {
    normalize_whitespace(&flatten_detection(detection))
}

/// Decode the image at `path` and run `engine` over it.
///
/// Both steps happen on a blocking thread. Decode failures and engine
/// failures are fatal for the run.
pub async fn run_ocr(
    engine: Arc<dyn OcrEngine>,
    path: &Path,
) -> Result<OcrDetection, ExtractError> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let decode_err = |detail: String| ExtractError::ImageDecode {
            path: path.clone(),
            detail,
        };
        // Sniff the format from content: downloads and byte inputs have no
        // reliable extension.
        let img = image::ImageReader::open(&path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| decode_err(e.to_string()))?
            .decode()
            .map_err(|e| decode_err(e.to_string()))?;
        debug!(
            "Decoded {} ({}x{}) for {}",
            path.display(),
            img.width(),
            img.height(),
            engine.name()
        );
        engine
            .recognize(&img)
            .map_err(|source| ExtractError::OcrFailed { path, source })
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("OCR task panicked: {e}")))?
}

// ── Built-in ocrs engine ─────────────────────────────────────────────────────

#[cfg(feature = "ocrs")]
pub use ocrs_backend::OcrsEngine;

#[cfg(feature = "ocrs")]
mod ocrs_backend {
    use super::{BoundingBox, OcrDetection, OcrEngine, OcrLine, OcrWord};
    use crate::error::{ExtractError, OcrError};
    use ocrs::{ImageSource, OcrEngineParams, TextItem};
    use std::path::Path;
    use tracing::info;

    /// Pure-Rust OCR using the ocrs detection + recognition models.
    ///
    /// ocrs does not score words, so `confidence` is always `None`.
    pub struct OcrsEngine {
        engine: ocrs::OcrEngine,
    }

    impl OcrsEngine {
        /// Build an engine from already-loaded models.
        pub fn new(detection: rten::Model, recognition: rten::Model) -> Result<Self, OcrError> {
            let engine = ocrs::OcrEngine::new(OcrEngineParams {
                detection_model: Some(detection),
                recognition_model: Some(recognition),
                ..Default::default()
            })
            .map_err(|e| OcrError::Prepare(e.to_string()))?;
            Ok(Self { engine })
        }

        /// Load models from explicit paths, downloading whichever is missing.
        pub fn from_paths(
            detection: Option<&Path>,
            recognition: Option<&Path>,
        ) -> Result<Self, ExtractError> {
            let load_err = |e: ocrs_auto::OcrsAutoError| ExtractError::OcrModelLoad(e.to_string());

            let paths = match (detection, recognition) {
                (Some(d), Some(r)) => ocrs_auto::ModelPaths {
                    detection: d.to_path_buf(),
                    recognition: r.to_path_buf(),
                },
                (d, r) => {
                    let cached = ocrs_auto::ensure_models(None).map_err(load_err)?;
                    ocrs_auto::ModelPaths {
                        detection: d.map(Path::to_path_buf).unwrap_or(cached.detection),
                        recognition: r.map(Path::to_path_buf).unwrap_or(cached.recognition),
                    }
                }
            };
            info!(
                "Loading OCR models: {} / {}",
                paths.detection.display(),
                paths.recognition.display()
            );

            let (det, rec) = ocrs_auto::load_models_from_paths(&paths).map_err(load_err)?;
            Self::new(det, rec).map_err(|e| ExtractError::OcrModelLoad(e.to_string()))
        }
    }

    impl OcrEngine for OcrsEngine {
        fn name(&self) -> &str {
            "ocrs"
        }

        fn recognize(&self, image: &image::DynamicImage) -> Result<OcrDetection, OcrError> {
            let rgb = image.to_rgb8();
            let source = ImageSource::from_bytes(rgb.as_raw(), rgb.dimensions())
                .map_err(|e| OcrError::Prepare(e.to_string()))?;
            let input = self
                .engine
                .prepare_input(source)
                .map_err(|e| OcrError::Prepare(e.to_string()))?;

            let word_rects = self
                .engine
                .detect_words(&input)
                .map_err(|e| OcrError::Recognition(e.to_string()))?;
            let line_rects = self.engine.find_text_lines(&input, &word_rects);
            let line_texts = self
                .engine
                .recognize_text(&input, &line_rects)
                .map_err(|e| OcrError::Recognition(e.to_string()))?;

            let lines = line_texts
                .iter()
                .flatten()
                .map(|line| OcrLine {
                    words: line
                        .words()
                        .map(|word| {
                            let rect = word.bounding_rect();
                            OcrWord {
                                text: word.to_string(),
                                confidence: None,
                                bbox: Some(BoundingBox {
                                    left: rect.left() as f32,
                                    top: rect.top() as f32,
                                    right: rect.right() as f32,
                                    bottom: rect.bottom() as f32,
                                }),
                            }
                        })
                        .collect(),
                })
                .collect();

            Ok(OcrDetection { lines })
        }
    }
}
