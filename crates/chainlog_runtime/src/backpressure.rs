//! Backpressure policy for a full ingestion queue.
//!
//! The policy decides what a producer experiences when the queue is at
//! capacity; the queue itself enforces it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What `log()` does when the queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackpressurePolicy {
    /// Suspend the caller until space frees
    #[default]
    Block,
    /// Fail immediately with a backpressure error
    Reject,
    /// Evict the oldest queued record to admit the new one
    DropOldest,
}

impl BackpressurePolicy {
    /// Configuration name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Reject => "reject",
            Self::DropOldest => "drop-oldest",
        }
    }

    /// Whether producers may lose records that were accepted earlier
    #[must_use]
    pub const fn is_lossy(&self) -> bool {
        matches!(self, Self::DropOldest)
    }
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown policy name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown backpressure policy '{0}' (expected block, reject or drop-oldest)")]
pub struct ParsePolicyError(pub String);

impl FromStr for BackpressurePolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "reject" => Ok(Self::Reject),
            "drop-oldest" | "drop_oldest" => Ok(Self::DropOldest),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}
