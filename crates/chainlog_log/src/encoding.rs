//! Canonical text encoding for hashing.
//!
//! The record text is `index|timestamp|level|category|message|data`. Text
//! fields escape `\` and `|` so field boundaries stay unambiguous, and `data`
//! is compact JSON with sorted keys. Logically identical entries always encode
//! to the same bytes regardless of how their payload was built.

use crate::chain::EntryFields;
use crate::entry::{LogData, Value};

/// Field separator in the canonical record text
pub const SEPARATOR: char = '|';

/// Encode one entry's fields as canonical record text
#[must_use]
pub fn canonical_record(fields: &EntryFields<'_>) -> String {
    let mut out = String::with_capacity(
        64 + fields.level.len() + fields.category.len() + fields.message.len(),
    );
    out.push_str(&fields.index.to_string());
    out.push(SEPARATOR);
    out.push_str(&fields.timestamp.canonical());
    out.push(SEPARATOR);
    push_escaped(&mut out, fields.level);
    out.push(SEPARATOR);
    push_escaped(&mut out, fields.category);
    out.push(SEPARATOR);
    push_escaped(&mut out, fields.message);
    out.push(SEPARATOR);
    out.push_str(&canonical_data(fields.data));
    out
}

/// Compact JSON object with keys in sorted order (`{}` when empty)
#[must_use]
pub fn canonical_data(data: &LogData) -> String {
    let mut out = String::from("{");
    for (i, (key, value)) in data.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&json_string(key));
        out.push(':');
        out.push_str(&canonical_value(value));
    }
    out.push('}');
    out
}

/// Fixed scalar encoding
#[must_use]
pub fn canonical_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        // Non-finite floats are rejected at validation; encode as null if one slips in.
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map_or_else(|| "null".to_string(), |n| n.to_string()),
        Value::Text(s) => json_string(s),
    }
}

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn push_escaped(out: &mut String, field: &str) {
    for c in field.chars() {
        if c == '\\' || c == SEPARATOR {
            out.push('\\');
        }
        out.push(c);
    }
}
