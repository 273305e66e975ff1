//! Persistence: write the result as pretty JSON and as a two-column CSV.
//!
//! The JSON file matches Python's `json.dumps(value, indent=4)` byte for
//! byte (4-space indent, `": "` separator, ASCII-only output with `\uXXXX`
//! escapes, no trailing newline), so files produced by earlier tooling and
//! by this crate diff cleanly.
//!
//! The CSV is a flat label/value view: one row per top-level key, nested
//! values written as compact JSON in a single cell.
//!
//! Both files are written atomically (temp file + rename) and overwrite any
//! previous run's output.

use crate::error::ExtractError;
use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter, Serializer};
use serde_json::Value;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Header of the value column in the CSV output.
pub const CSV_VALUE_HEADER: &str = "Extracted Value";

// ── JSON ─────────────────────────────────────────────────────────────────────

/// Pretty printer with Python `json.dumps(indent=4)` output.
///
/// Layout is delegated to [`PrettyFormatter`]; only string contents differ:
/// every non-ASCII char (and DEL) is written as one or two `\uXXXX` escapes.
struct AsciiPrettyFormatter<'a> {
    inner: PrettyFormatter<'a>,
}

impl AsciiPrettyFormatter<'_> {
    fn new() -> Self {
        Self {
            inner: PrettyFormatter::with_indent(b"    "),
        }
    }
}

impl Formatter for AsciiPrettyFormatter<'_> {
    fn begin_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.inner.begin_array(writer)
    }

    fn end_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.inner.end_array(writer)
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.inner.begin_array_value(writer, first)
    }

    fn end_array_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.inner.end_array_value(writer)
    }

    fn begin_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.inner.begin_object(writer)
    }

    fn end_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.inner.end_object(writer)
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.inner.begin_object_key(writer, first)
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.inner.begin_object_value(writer)
    }

    fn end_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.inner.end_object_value(writer)
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if c.is_ascii() && c != '\x7f' {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Render `value` exactly like Python's `json.dumps(value, indent=4)`.
pub fn render_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, AsciiPrettyFormatter::new());
    // Writing into a Vec cannot fail and a Value always serialises.
    if value.serialize(&mut ser).is_err() {
        return String::new();
    }
    // Output is pure ASCII by construction.
    String::from_utf8_lossy(&buf).into_owned()
}

/// Write `value` to `path` as pretty JSON, replacing any existing file.
pub async fn write_json(path: &Path, value: &Value) -> Result<(), ExtractError> {
    let rendered = render_json(value);
    debug!("Writing {} bytes of JSON to {}", rendered.len(), path.display());
    write_atomic(path, rendered.as_bytes()).await
}

// ── CSV ──────────────────────────────────────────────────────────────────────

/// Flatten `value` into `(label, cell)` rows.
///
/// Objects give one row per key in document order. Arrays are labelled by
/// index and any other value becomes a single row labelled `0`.
pub fn tabulate(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), cell_text(v)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), cell_text(v)))
            .collect(),
        scalar => vec![("0".to_string(), cell_text(scalar))],
    }
}

/// Strings verbatim, null empty, booleans as `True`/`False` (the pandas
/// spelling), everything else as compact JSON.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render rows as CSV with the `,Extracted Value` header.
pub fn render_csv(rows: &[(String, String)]) -> Result<String, ExtractError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["", CSV_VALUE_HEADER])?;
    for (label, cell) in rows {
        wtr.write_record([label.as_str(), cell.as_str()])?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| ExtractError::Internal(format!("CSV flush failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| ExtractError::Internal(format!("CSV is not UTF-8: {e}")))
}

/// Write the CSV view of `value` to `path`, replacing any existing file.
pub async fn write_csv(path: &Path, value: &Value) -> Result<(), ExtractError> {
    let rows = tabulate(value);
    let rendered = render_csv(&rows)?;
    debug!("Writing {} CSV rows to {}", rows.len(), path.display());
    write_atomic(path, rendered.as_bytes()).await
}

// ── File helpers ─────────────────────────────────────────────────────────────

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write to `<path>.tmp`, then rename over `path`. The temp file is removed
/// if either step fails.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExtractError> {
    let write_err = |source| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp = tmp_path(path);
    let result = match tokio::fs::write(&tmp, bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }
    Ok(())
}
