//! Batch writer.
//!
//! Buffers chained entries and writes them to the store in one atomic batch.
//! Lives inside the worker task and is never shared.

use chainlog_log::LogEntry;
use chainlog_storage::{PersistentStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::monitor::EngineStats;

/// Bounded exponential backoff for failed flushes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First delay
    pub initial: Duration,
    /// Delay ceiling
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial.saturating_mul(1u32 << shift).min(self.max)
    }

    /// Total attempts allowed, including the first
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_millis(50),
            max: Duration::from_secs(2),
        }
    }
}

/// Accumulates entries and flushes them as one transaction
pub struct BatchWriter {
    store: Arc<dyn PersistentStore>,
    buffer: Vec<LogEntry>,
    batch_size: usize,
    retry: RetryPolicy,
    stats: Arc<EngineStats>,
}

impl BatchWriter {
    /// Create a writer flushing every `batch_size` entries
    #[must_use]
    pub fn new(
        store: Arc<dyn PersistentStore>,
        batch_size: usize,
        retry: RetryPolicy,
        stats: Arc<EngineStats>,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            retry,
            stats,
        }
    }

    /// Buffer an entry. Returns true once the buffer reached `batch_size`.
    pub fn push(&mut self, entry: LogEntry) -> bool {
        self.buffer.push(entry);
        self.is_full()
    }

    /// Entries waiting for the next flush
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether the size trigger has fired
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.batch_size
    }

    /// Write the buffer as one batch, retrying with backoff.
    ///
    /// Returns the number of entries written. The buffer is consumed either
    /// way: after retries are exhausted its entries are unrecoverable and the
    /// caller must stop accepting new ones.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] after `max_retries` retries
    pub async fn flush(&mut self) -> EngineResult<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let batch = Arc::new(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.batch_size),
        ));
        let mut attempt = 1;
        loop {
            match self.write(Arc::clone(&batch), attempt > 1).await {
                Ok(()) => {
                    self.stats.record_flush(batch.len());
                    tracing::debug!(entries = batch.len(), attempt, "flushed batch");
                    return Ok(batch.len());
                }
                Err(err) if attempt < self.retry.attempts() => {
                    let delay = self.retry.delay(attempt);
                    self.stats.record_retry();
                    tracing::warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "batch write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        attempts = attempt,
                        lost = batch.len(),
                        "batch write failed permanently"
                    );
                    return Err(EngineError::Persistence {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    async fn write(&self, batch: Arc<Vec<LogEntry>>, retrying: bool) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || match store.append_batch(&batch) {
            // A previous attempt may have committed before reporting failure.
            Err(StoreError::Duplicate { .. }) if retrying && already_persisted(&*store, &batch) => {
                Ok(())
            }
            other => other,
        })
        .await
        .map_err(StoreError::backend)?
    }
}

fn already_persisted(store: &dyn PersistentStore, batch: &[LogEntry]) -> bool {
    let Some(last) = batch.last() else {
        return true;
    };
    matches!(store.tip(), Ok(Some(tip)) if tip.index >= last.index)
        && matches!(
            store.read_range(last.index, 1).as_deref(),
            Ok([stored]) if stored.entry_hash == last.entry_hash
        )
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("buffered", &self.buffer.len())
            .field("batch_size", &self.batch_size)
            .field("retry", &self.retry)
            .finish()
    }
}
