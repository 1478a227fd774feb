//! Log entry types.
//!
//! A record starts life as a [`Provisional`] at the producer call site and is
//! turned into a [`LogEntry`] only by the chain owner, which assigns the index,
//! timestamp and digests.

use chainlog_core::{CoreError, CoreResult, Hash, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chain::EntryFields;

/// Longest accepted level name
pub const MAX_LEVEL_LEN: usize = 16;
/// Longest accepted category
pub const MAX_CATEGORY_LEN: usize = 64;
/// Longest accepted message, in bytes
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;
/// Longest accepted data key
pub const MAX_KEY_LEN: usize = 128;
/// Most keys accepted in one data map
pub const MAX_DATA_KEYS: usize = 256;

/// Scalar value stored in an entry's data map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Explicit absence
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Finite float
    Float(f64),
    /// UTF-8 text
    Text(String),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Structured payload: unique string keys mapped to scalars.
///
/// Keys are kept sorted, so two maps built in different orders are equal and
/// canonicalize identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogData(BTreeMap<String, Value>);

impl LogData {
    /// Empty payload
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a key, replacing any previous value
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a key, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Look up a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Iterate in canonical (sorted) key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn validate(&self) -> CoreResult<()> {
        if self.0.len() > MAX_DATA_KEYS {
            return Err(CoreError::validation(
                "data",
                format!("{} keys exceeds limit of {}", self.0.len(), MAX_DATA_KEYS),
            ));
        }
        for (key, value) in &self.0 {
            if key.is_empty() || key.chars().count() > MAX_KEY_LEN {
                return Err(CoreError::validation(
                    "data",
                    format!("key length must be 1..={MAX_KEY_LEN}"),
                ));
            }
            if key.chars().any(char::is_control) {
                return Err(CoreError::validation("data", "key contains control characters"));
            }
            if let Value::Float(f) = value {
                if !f.is_finite() {
                    return Err(CoreError::validation(
                        "data",
                        format!("value for {key:?} is not a finite number"),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for LogData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A validated record that has not been placed in the chain yet
#[derive(Debug, Clone, PartialEq)]
pub struct Provisional {
    level: String,
    category: String,
    message: String,
    data: LogData,
}

impl Provisional {
    /// Validate producer input.
    ///
    /// The level is normalized to upper case.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if any field is malformed
    pub fn new(
        level: &str,
        category: &str,
        message: impl Into<String>,
        data: LogData,
    ) -> CoreResult<Self> {
        let level = normalize_level(level)?;
        validate_category(category)?;
        let message = message.into();
        validate_message(&message)?;
        data.validate()?;

        Ok(Self {
            level,
            category: category.to_string(),
            message,
            data,
        })
    }

    /// Normalized level
    #[must_use]
    pub fn level(&self) -> &str {
        &self.level
    }

    /// Category
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Payload
    #[must_use]
    pub fn data(&self) -> &LogData {
        &self.data
    }

    /// Finalize into a chained entry
    #[must_use]
    pub fn finalize(self, index: u64, timestamp: Timestamp, prev_hash: Hash) -> LogEntry {
        let fields = EntryFields {
            index,
            timestamp,
            level: &self.level,
            category: &self.category,
            message: &self.message,
            data: &self.data,
        };
        let entry_hash = fields.digest(&prev_hash);

        LogEntry {
            index,
            timestamp,
            level: self.level,
            category: self.category,
            message: self.message,
            data: self.data,
            prev_hash,
            entry_hash,
        }
    }
}

/// A finalized, chained log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the chain, contiguous from 0
    pub index: u64,
    /// Commit time assigned by the chain owner
    pub timestamp: Timestamp,
    /// Upper-case level
    pub level: String,
    /// Category
    pub category: String,
    /// Free-form message
    pub message: String,
    /// Structured payload
    pub data: LogData,
    /// Digest of the entry at `index - 1`, or genesis
    pub prev_hash: Hash,
    /// Digest over every field above
    pub entry_hash: Hash,
}

impl LogEntry {
    /// Hashable view of this entry's own fields
    #[must_use]
    pub fn fields(&self) -> EntryFields<'_> {
        EntryFields {
            index: self.index,
            timestamp: self.timestamp,
            level: &self.level,
            category: &self.category,
            message: &self.message,
            data: &self.data,
        }
    }

    /// Recompute the digest against a given predecessor
    #[must_use]
    pub fn recompute_hash(&self, prev_hash: &Hash) -> Hash {
        self.fields().digest(prev_hash)
    }
}

fn normalize_level(level: &str) -> CoreResult<String> {
    if level.is_empty() || level.len() > MAX_LEVEL_LEN {
        return Err(CoreError::validation(
            "level",
            format!("length must be 1..={MAX_LEVEL_LEN}"),
        ));
    }
    if !level.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CoreError::validation(
            "level",
            "only ASCII letters, digits and '_' are allowed",
        ));
    }
    Ok(level.to_ascii_uppercase())
}

fn validate_category(category: &str) -> CoreResult<()> {
    let len = category.chars().count();
    if len == 0 || len > MAX_CATEGORY_LEN {
        return Err(CoreError::validation(
            "category",
            format!("length must be 1..={MAX_CATEGORY_LEN}"),
        ));
    }
    if category.chars().any(char::is_control) {
        return Err(CoreError::validation("category", "contains control characters"));
    }
    Ok(())
}

fn validate_message(message: &str) -> CoreResult<()> {
    if message.len() > MAX_MESSAGE_LEN {
        return Err(CoreError::validation(
            "message",
            format!("{} bytes exceeds limit of {}", message.len(), MAX_MESSAGE_LEN),
        ));
    }
    if message.contains('\0') {
        return Err(CoreError::validation("message", "contains NUL"));
    }
    Ok(())
}
