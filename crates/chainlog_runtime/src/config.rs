//! Engine configuration.
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! db_name = "/var/lib/chainlog/audit.redb"
//! batch_size = 100
//! backpressure_policy = "drop-oldest"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backpressure::BackpressurePolicy;
use crate::batch::RetryPolicy;
use crate::error::{EngineError, EngineResult};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Path of the redb database file
    pub db_name: PathBuf,
    /// Entries per flush
    pub batch_size: usize,
    /// Maximum time a non-empty buffer waits before flushing
    pub flush_interval_ms: u64,
    /// Ingestion queue capacity
    pub queue_capacity: usize,
    /// Behavior when the queue is full
    pub backpressure_policy: BackpressurePolicy,
    /// Retries after a failed flush before the engine fails closed
    pub max_retries: u32,
    /// First retry delay
    pub retry_backoff_ms: u64,
    /// Retry delay ceiling
    pub retry_backoff_max_ms: u64,
    /// Heartbeat period; no heartbeat when unset
    pub heartbeat_interval_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_name: PathBuf::from("chainlog.redb"),
            batch_size: 50,
            flush_interval_ms: 2_000,
            queue_capacity: 10_000,
            backpressure_policy: BackpressurePolicy::Block,
            max_retries: 3,
            retry_backoff_ms: 50,
            retry_backoff_max_ms: 2_000,
            heartbeat_interval_ms: None,
        }
    }
}

impl EngineConfig {
    /// Default configuration writing to `db_name`
    #[must_use]
    pub fn new(db_name: impl Into<PathBuf>) -> Self {
        Self {
            db_name: db_name.into(),
            ..Self::default()
        }
    }

    /// Parse from TOML text
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] on malformed TOML, unknown keys, or
    /// values rejected by [`validate`](Self::validate)
    pub fn from_toml(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Set the database path
    #[must_use]
    pub fn with_db_name(mut self, db_name: impl Into<PathBuf>) -> Self {
        self.db_name = db_name.into();
        self
    }

    /// Set the batch size
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the flush interval
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the queue capacity
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the backpressure policy
    #[must_use]
    pub fn with_backpressure_policy(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure_policy = policy;
        self
    }

    /// Set the retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the retry backoff bounds
    #[must_use]
    pub fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_backoff_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
        self.retry_backoff_max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable the heartbeat producer
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = Some(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Flush interval as a duration
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Heartbeat period, if enabled
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms.map(Duration::from_millis)
    }

    /// Retry policy for failed flushes
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial: Duration::from_millis(self.retry_backoff_ms),
            max: Duration::from_millis(self.retry_backoff_max_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time and
    /// capped at `retry_backoff_max_ms`
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_policy().delay(attempt)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] naming the first bad field
    pub fn validate(&self) -> EngineResult<()> {
        if self.batch_size == 0 {
            return Err(EngineError::config("batch_size must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::config("queue_capacity must be at least 1"));
        }
        if self.flush_interval_ms == 0 {
            return Err(EngineError::config("flush_interval_ms must be at least 1"));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_ms {
            return Err(EngineError::config(
                "retry_backoff_max_ms must not be below retry_backoff_ms",
            ));
        }
        if self.heartbeat_interval_ms == Some(0) {
            return Err(EngineError::config("heartbeat_interval_ms must be at least 1"));
        }
        if self.db_name.as_os_str().is_empty() {
            return Err(EngineError::config("db_name must not be empty"));
        }
        Ok(())
    }
}
