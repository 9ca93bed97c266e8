//! Flexible decoding of tool output.
//!
//! Platform tools emit a mix of shapes: JSON arrays, newline-delimited JSON,
//! and the occasional bare object. The decoder tries the whole input as a
//! single JSON document first (array → the batch, object → a one-element
//! batch), then falls back to line-by-line NDJSON, skipping and logging
//! malformed lines rather than failing the whole batch.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Decoded batch plus a count of lines that failed to parse.
#[derive(Debug, Clone, Default)]
pub struct FlexibleBatch {
    pub records: Vec<Value>,
    /// Malformed lines skipped during NDJSON fallback.
    pub skipped: usize,
}

impl FlexibleBatch {
    /// Whether any line failed to decode.
    pub fn degraded(&self) -> bool {
        self.skipped > 0
    }
}

/// Decode tool output into a batch of JSON values.
pub fn decode_flexible(text: &str) -> FlexibleBatch {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return FlexibleBatch::default();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => {
            return FlexibleBatch {
                records: items,
                skipped: 0,
            };
        }
        Ok(value @ Value::Object(_)) => {
            // A bare single JSON document is a one-element batch.
            return FlexibleBatch {
                records: vec![value],
                skipped: 0,
            };
        }
        _ => {}
    }

    // NDJSON fallback: one JSON value per line, bad lines skipped.
    let mut records = Vec::new();
    let mut skipped = 0;
    for (index, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => records.push(value),
            Err(error) => {
                skipped += 1;
                warn!(line = index + 1, %error, "skipping malformed NDJSON line");
            }
        }
    }

    FlexibleBatch { records, skipped }
}

/// Split pipe-delimited tabular text into rows of trimmed cells.
///
/// Some tools print `a | b | c` tables instead of JSON. Blank lines and
/// horizontal rules (lines of only `-`, `=` and `|`) are dropped.
pub fn parse_pipe_table(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.chars().all(|c| matches!(c, '-' | '=' | '|' | ' ')))
        .map(|line| {
            line.trim_matches('|')
                .split('|')
                .map(|cell| cell.trim().to_string())
                .collect()
        })
        .collect()
}

/// Typed records plus a count of values that did not match the shape.
#[derive(Debug, Clone)]
pub struct ParsedRecords<T> {
    pub records: Vec<T>,
    /// Values skipped because they failed shape validation.
    pub skipped: usize,
}

/// Validate each decoded value against an expected shape, skipping (and
/// logging) mismatches instead of failing the batch.
pub fn parse_records<T: DeserializeOwned>(batch: FlexibleBatch) -> ParsedRecords<T> {
    let mut records = Vec::with_capacity(batch.records.len());
    let mut skipped = batch.skipped;
    for value in batch.records {
        match serde_json::from_value::<T>(value) {
            Ok(record) => records.push(record),
            Err(error) => {
                skipped += 1;
                warn!(%error, "skipping record with unexpected shape");
            }
        }
    }
    ParsedRecords { records, skipped }
}
