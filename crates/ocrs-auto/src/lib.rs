//! # ocrs-auto
//!
//! Auto-download and cache the [ocrs](https://github.com/robertknight/ocrs)
//! text detection and recognition models at runtime, so that users of the
//! `ocrs` engine no longer need to fetch the `.rten` files by hand.
//!
//! ## How it works
//!
//! On first call to [`load_models`] or [`ensure_models`]:
//!
//! 1. Honours `OCRS_DETECTION_MODEL` / `OCRS_RECOGNITION_MODEL` when they point
//!    to existing files.
//! 2. Checks `~/.cache/invoice2json/ocrs-models-{VERSION}/` for each model.
//! 3. If absent, downloads the model from the public ocrs model bucket into
//!    the cache dir (written to a `.part` file, then renamed).
//! 4. [`load_models`] then loads both files with [`rten::Model::load_file`].
//!
//! Subsequent calls skip the network entirely.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ocrs_auto::{ensure_models, load_models_from_paths};
//!
//! let paths = ensure_models(Some(&|downloaded, total| {
//!     if let Some(t) = total {
//!         eprint!("\rDownloading OCR models: {}/{} bytes", downloaded, t);
//!     }
//! })).expect("download failed");
//! let (detection, recognition) = load_models_from_paths(&paths).expect("load failed");
//! ```
//!
//! ## Environment variable overrides
//!
//! - `OCRS_DETECTION_MODEL` — path to an existing `text-detection.rten`.
//! - `OCRS_RECOGNITION_MODEL` — path to an existing `text-recognition.rten`.
//! - `OCRS_AUTO_CACHE_DIR` — override the default cache directory.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use rten::Model;
use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Cache layout version. Bump when the upstream model files change shape.
pub const MODELS_VERSION: &str = "1";

/// Public bucket hosting the ocrs reference models.
const BASE_URL: &str = "https://ocrs-models.s3-accelerate.amazonaws.com";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by ocrs-auto operations.
#[derive(Error, Debug)]
pub enum OcrsAutoError {
    /// Could not create or navigate the local cache directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// Network download failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// `rten` could not parse the model file.
    #[error("Failed to load OCR model from '{path}': {reason}")]
    Load { path: PathBuf, reason: String },
}

// ── Model catalogue ──────────────────────────────────────────────────────────

/// The two models an ocrs engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Finds word boxes in the page image.
    Detection,
    /// Reads the characters inside each text line.
    Recognition,
}

impl ModelKind {
    /// File name both in the bucket and in the cache dir.
    pub fn file_name(self) -> &'static str {
        match self {
            ModelKind::Detection => "text-detection.rten",
            ModelKind::Recognition => "text-recognition.rten",
        }
    }

    /// Environment variable that can point at a local copy.
    pub fn env_var(self) -> &'static str {
        match self {
            ModelKind::Detection => "OCRS_DETECTION_MODEL",
            ModelKind::Recognition => "OCRS_RECOGNITION_MODEL",
        }
    }

    fn url(self) -> String {
        format!("{}/{}", BASE_URL, self.file_name())
    }
}

/// On-disk locations of both models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detection: PathBuf,
    pub recognition: PathBuf,
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the per-version cache directory for the OCR models.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/invoice2json/ocrs-models-{VERSION}/`
/// - **Linux**: `~/.cache/invoice2json/ocrs-models-{VERSION}/`
/// - **Windows**: `%LOCALAPPDATA%\invoice2json\ocrs-models-{VERSION}\`
///
/// Override by setting `OCRS_AUTO_CACHE_DIR`.
pub fn models_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("OCRS_AUTO_CACHE_DIR") {
        return PathBuf::from(override_dir).join(format!("ocrs-models-{MODELS_VERSION}"));
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("invoice2json")
        .join(format!("ocrs-models-{MODELS_VERSION}"))
}

// ── Thread-safe singleton path cache ─────────────────────────────────────────

static RESOLVED_PATHS: OnceLock<ModelPaths> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns `true` if both models are available locally (no network access
/// needed on the next call to [`ensure_models`]).
pub fn are_models_cached() -> bool {
    cached_model_paths().is_some()
}

/// Returns the on-disk paths of both models, or `None` if either is missing.
pub fn cached_model_paths() -> Option<ModelPaths> {
    let cache_dir = models_cache_dir();
    Some(ModelPaths {
        detection: locate_local(ModelKind::Detection, &cache_dir)?,
        recognition: locate_local(ModelKind::Recognition, &cache_dir)?,
    })
}

/// Ensures both models are present in the local cache.
///
/// `on_progress` receives `(bytes_downloaded, total_size_option)` during
/// each download. Pass `None` to suppress progress callbacks.
///
/// Safe to call from multiple threads; the resolved paths are memoised for
/// the process lifetime.
pub fn ensure_models(
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<ModelPaths, OcrsAutoError> {
    if let Some(paths) = RESOLVED_PATHS.get() {
        return Ok(paths.clone());
    }

    let cache_dir = models_cache_dir();
    let paths = ModelPaths {
        detection: resolve_or_download(ModelKind::Detection, &cache_dir, on_progress)?,
        recognition: resolve_or_download(ModelKind::Recognition, &cache_dir, on_progress)?,
    };

    let _ = RESOLVED_PATHS.set(paths.clone());

    Ok(paths)
}

/// Loads both models, downloading them first if necessary.
pub fn load_models(
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<(Model, Model), OcrsAutoError> {
    let paths = ensure_models(on_progress)?;
    load_models_from_paths(&paths)
}

/// Loads both models from explicit paths.
///
/// Does not interact with the download / cache layer.
pub fn load_models_from_paths(paths: &ModelPaths) -> Result<(Model, Model), OcrsAutoError> {
    Ok((load_model(&paths.detection)?, load_model(&paths.recognition)?))
}

/// Loads a single `.rten` model file.
pub fn load_model(path: &Path) -> Result<Model, OcrsAutoError> {
    Model::load_file(path).map_err(|e| OcrsAutoError::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Env override first, then the cache dir. Never touches the network.
fn locate_local(kind: ModelKind, cache_dir: &Path) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(kind.env_var()) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Some(pb);
        }
    }
    let p = cache_dir.join(kind.file_name());
    p.exists().then_some(p)
}

fn resolve_or_download(
    kind: ModelKind,
    cache_dir: &Path,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<PathBuf, OcrsAutoError> {
    if let Ok(env_path) = std::env::var(kind.env_var()) {
        if !Path::new(&env_path).exists() {
            eprintln!(
                "ocrs-auto: {} '{}' not found; downloading …",
                kind.env_var(),
                env_path
            );
        }
    }

    if let Some(p) = locate_local(kind, cache_dir) {
        return Ok(p);
    }

    std::fs::create_dir_all(cache_dir).map_err(OcrsAutoError::CacheDir)?;

    let dest = cache_dir.join(kind.file_name());
    let bytes = download_bytes(&kind.url(), on_progress)?;
    write_atomically(&dest, &bytes)?;

    Ok(dest)
}

/// Streams a URL into a `Vec<u8>`, calling `on_progress` every 64 KiB.
fn download_bytes(
    url: &str,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<Vec<u8>, OcrsAutoError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("ocrs-auto/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| OcrsAutoError::Download(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| OcrsAutoError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(OcrsAutoError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let capacity = total.unwrap_or(12 * 1024 * 1024) as usize;
    let mut buf = Vec::with_capacity(capacity);

    let mut stream = response;
    let mut chunk = vec![0u8; 64 * 1024];
    let mut downloaded: u64 = 0;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(downloaded, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(OcrsAutoError::Download(format!("Read error: {e}")));
            }
        }
    }

    Ok(buf)
}

/// Writes `<dest>.part` then renames, so a killed download never leaves a
/// truncated model that later fails to parse.
fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<(), OcrsAutoError> {
    let part = dest.with_extension("rten.part");
    let mut f = std::fs::File::create(&part).map_err(OcrsAutoError::CacheDir)?;
    f.write_all(bytes).map_err(OcrsAutoError::CacheDir)?;
    f.sync_all().map_err(OcrsAutoError::CacheDir)?;
    std::fs::rename(&part, dest).map_err(OcrsAutoError::CacheDir)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
