//! Engine errors.

use chainlog_core::CoreError;
use chainlog_storage::StoreError;

use crate::state::EngineState;

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced to callers of the engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Malformed level, category, message or payload. Nothing was enqueued.
    #[error("Validation error: {0}")]
    Validation(CoreError),
    /// Queue full under the `reject` policy
    #[error("Backpressure: ingestion queue full ({capacity} records)")]
    Backpressure {
        /// Queue capacity
        capacity: usize,
    },
    /// A batch could not be persisted after every retry
    #[error("Persistence failed after {attempts} attempts: {source}")]
    Persistence {
        /// Attempts made, including the first
        attempts: u32,
        /// Last store error
        source: StoreError,
    },
    /// The engine no longer accepts entries
    #[error("Engine is {state}, not accepting entries")]
    Shutdown {
        /// State at the time of the call
        state: EngineState,
    },
    /// Invalid configuration
    #[error("Invalid configuration: {reason}")]
    Config {
        /// What is wrong
        reason: String,
    },
    /// Store read or open failure outside the flush path
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether the caller may simply try again later
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }

    /// Build a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        Self::Validation(err)
    }
}
