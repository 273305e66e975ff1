//! Pipeline stages for invoice extraction.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own and its backend swapped without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ ocr ──▶ structure (llm + parse) ──▶ persist
//! (URL/path) (ocrs)  (prompt, model, JSON)      (JSON + CSV)
//! ```
//!
//! 1. [`input`]     — canonicalise the user-supplied path or URL to a local image
//! 2. [`ocr`]       — detect and recognise words on a blocking thread, then
//!    flatten them into one whitespace-normalised string
//! 3. [`structure`] — build the prompt and drive the model through [`llm`],
//!    then turn the completion into JSON with [`parse`]; falls back to the
//!    raw-text record when that fails
//! 4. [`persist`]   — write the pretty JSON file and the two-column CSV

pub mod input;
pub mod llm;
pub mod ocr;
pub mod parse;
pub mod persist;
pub mod structure;
