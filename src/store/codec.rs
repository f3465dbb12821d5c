//! Serialization codecs for the persisted store
//!
//! Two interchangeable forms, selected at construction rather than sniffed
//! from content: a self-describing JSON document carrying location and
//! timestamps, and a line-oriented `key=value` format with no metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config (line {line}): {text}")]
    MalformedLine { line: usize, text: String },
    #[error("unescaped line break in {what}: {text:?}")]
    UnescapedLineBreak { what: &'static str, text: String },
}

/// On-disk document form: one JSON object with the store's location, the
/// flat map, and both timestamps. Absent fields are omitted entirely so a
/// never-saved document carries no misleading zero timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "dir_is_empty")]
    pub dir: PathBuf,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

fn dir_is_empty(dir: &PathBuf) -> bool {
    dir.as_os_str().is_empty()
}

/// Serialization scheme for the persisted store, chosen at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Single self-describing JSON document with location and timestamps
    #[default]
    Document,
    /// One `key=value` pair per line, keys sorted, no metadata
    Line,
}

impl Format {
    pub fn encode(&self, doc: &Document) -> Result<String, CodecError> {
        match self {
            Format::Document => encode_document(doc),
            Format::Line => encode_lines(&doc.data),
        }
    }

    pub fn decode(&self, input: &str) -> Result<Document, CodecError> {
        match self {
            Format::Document => decode_document(input),
            Format::Line => {
                let mut doc = Document::default();
                parse_lines(input, &mut doc.data)?;
                Ok(doc)
            }
        }
    }
}

pub fn encode_document(doc: &Document) -> Result<String, CodecError> {
    Ok(serde_json::to_string(doc)?)
}

pub fn decode_document(input: &str) -> Result<Document, CodecError> {
    Ok(serde_json::from_str(input)?)
}

/// Serializes the map as `key=value` lines, keys in ascending order for
/// reproducible output.
///
/// A raw carriage return or line feed in a key or value would corrupt the
/// line format, so it is rejected instead of written. Callers storing such
/// values must escape them first (see [`escape`]).
pub fn encode_lines(data: &BTreeMap<String, String>) -> Result<String, CodecError> {
    let mut out = String::new();
    for (key, value) in data {
        for (what, text) in [("key", key), ("value", value)] {
            if text.contains('\n') || text.contains('\r') {
                return Err(CodecError::UnescapedLineBreak {
                    what,
                    text: text.clone(),
                });
            }
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    Ok(out)
}

/// Parses `key=value` lines into the given map, returning the number of
/// pairs merged.
///
/// Parsing is additive: parsed pairs overwrite matching keys but never
/// remove existing ones. Lines end with `\r?\n` and blank lines are
/// skipped. Each remaining line must contain exactly one `=`; the first
/// malformed line aborts the whole parse, reporting its 1-based number and
/// verbatim text, and the map is left untouched.
pub fn parse_lines(
    input: &str,
    data: &mut BTreeMap<String, String>,
) -> Result<usize, CodecError> {
    let mut parsed = Vec::new();
    for (index, raw) in input.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('=').collect();
        if fields.len() != 2 {
            return Err(CodecError::MalformedLine {
                line: index + 1,
                text: line.to_string(),
            });
        }
        parsed.push((fields[0].to_string(), fields[1].to_string()));
    }
    let merged = parsed.len();
    for (key, value) in parsed {
        data.insert(key, value);
    }
    Ok(merged)
}

/// Replaces literal carriage returns and line feeds with their two-character
/// escape sequences so a value can survive the line format.
pub fn escape(s: &str) -> String {
    s.replace('\r', "\\r").replace('\n', "\\n")
}

/// Reverses [`escape`].
pub fn unescape(s: &str) -> String {
    s.replace("\\r", "\r").replace("\\n", "\n")
}
