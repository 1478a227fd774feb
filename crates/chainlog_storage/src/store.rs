//! Append-only entry store.
//!
//! Any backend that can insert a batch atomically, scan by index ascending,
//! and report its highest entry can back the engine.

use chainlog_core::CoreError;
use chainlog_log::LogEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// An entry with this index is already persisted
    #[error("Entry {index} already exists")]
    Duplicate {
        /// Offending index
        index: u64,
    },
    /// Batch does not continue the persisted sequence
    #[error("Out of order append: expected index {expected}, got {found}")]
    OutOfOrder {
        /// Next index the store accepts
        expected: u64,
        /// Index that was offered
        found: u64,
    },
    /// Storage engine failure
    #[error("Storage backend error: {reason}")]
    Backend {
        /// Backend message
        reason: String,
    },
    /// Stored bytes could not be encoded or decoded
    #[error("Codec error: {reason}")]
    Codec {
        /// Codec message
        reason: String,
    },
    /// IO error
    #[error("IO error: {reason}")]
    Io {
        /// IO message
        reason: String,
    },
}

impl StoreError {
    /// Build a backend error from any displayable cause
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend {
            reason: err.to_string(),
        }
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        Self::Codec {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

/// Append-only, index-ordered persistence for log entries.
///
/// Implementations must be `Send + Sync`; callers on an async runtime should
/// invoke them from a blocking context.
pub trait PersistentStore: Send + Sync {
    /// Insert all entries in one atomic operation: all land or none do.
    ///
    /// # Errors
    ///
    /// Returns error if the batch overlaps persisted indices, is not
    /// consecutive, or the backend fails
    fn append_batch(&self, entries: &[LogEntry]) -> StoreResult<()>;

    /// Up to `limit` entries with `index >= from`, ascending
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or stored bytes do not decode
    fn read_range(&self, from: u64, limit: usize) -> StoreResult<Vec<LogEntry>>;

    /// Entry with the highest index, if any
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or stored bytes do not decode
    fn tip(&self) -> StoreResult<Option<LogEntry>>;

    /// Number of persisted entries
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    fn count(&self) -> StoreResult<u64>;
}

/// Reject batches whose indices are not strictly consecutive, or that do not
/// start right after `tip_index`.
///
/// # Errors
///
/// Returns [`StoreError::OutOfOrder`] on the first misplaced entry
pub fn check_batch(entries: &[LogEntry], tip_index: Option<u64>) -> StoreResult<()> {
    let Some(first) = entries.first() else {
        return Ok(());
    };

    let mut expected = match tip_index {
        Some(tip) => tip + 1,
        None => first.index,
    };
    for entry in entries {
        if entry.index != expected {
            return Err(StoreError::OutOfOrder {
                expected,
                found: entry.index,
            });
        }
        expected += 1;
    }
    Ok(())
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Committed batches
    pub batches: u64,
    /// Entries written
    pub entries_written: u64,
    /// Range reads served
    pub reads: u64,
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<u64, LogEntry>>,
    stats: RwLock<StoreStats>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get store statistics
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn with_entries_mut<R>(&self, f: impl FnOnce(&mut BTreeMap<u64, LogEntry>) -> R) -> R {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut entries)
    }
}

impl PersistentStore for MemoryStore {
    fn append_batch(&self, entries: &[LogEntry]) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut stored = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let tip = stored.keys().next_back().copied();
        if let Some(dup) = entries.iter().find(|e| stored.contains_key(&e.index)) {
            return Err(StoreError::Duplicate { index: dup.index });
        }
        check_batch(entries, tip)?;

        for entry in entries {
            stored.insert(entry.index, entry.clone());
        }
        drop(stored);

        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        stats.batches += 1;
        stats.entries_written += entries.len() as u64;
        Ok(())
    }

    fn read_range(&self, from: u64, limit: usize) -> StoreResult<Vec<LogEntry>> {
        let page = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .range(from..)
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect();
        self.stats.write().unwrap_or_else(PoisonError::into_inner).reads += 1;
        Ok(page)
    }

    fn tip(&self) -> StoreResult<Option<LogEntry>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .next_back()
            .cloned())
    }

    fn count(&self) -> StoreResult<u64> {
        Ok(self.entries.read().unwrap_or_else(PoisonError::into_inner).len() as u64)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chainlog_core::Timestamp;
    use chainlog_log::{ChainState, LogData, Provisional};

    pub(crate) fn chain(n: u64) -> Vec<LogEntry> {
        let mut state = ChainState::genesis();
        (0..n)
            .map(|i| {
                let p = Provisional::new("INFO", "TEST", format!("m{i}"), LogData::new().with("i", i as i64))
                    .unwrap();
                state.commit(p, Timestamp::from_unix_micros(i as i64).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_store_new() {
        let store = MemoryStore::new();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.tip().unwrap().is_none());
    }

    #[test]
    fn test_append_and_read() {
        let store = MemoryStore::new();
        let entries = chain(5);
        store.append_batch(&entries[..3]).unwrap();
        store.append_batch(&entries[3..]).unwrap();

        assert_eq!(store.count().unwrap(), 5);
        assert_eq!(store.tip().unwrap().unwrap().index, 4);
        assert_eq!(store.read_range(2, 2).unwrap(), entries[2..4].to_vec());
        assert!(store.read_range(10, 5).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_duplicate() {
        let store = MemoryStore::new();
        let entries = chain(3);
        store.append_batch(&entries).unwrap();
        let err = store.append_batch(&entries[2..]).unwrap_err();
        assert_eq!(err, StoreError::Duplicate { index: 2 });
    }

    #[test]
    fn test_rejects_gap_atomically() {
        let store = MemoryStore::new();
        let entries = chain(5);
        store.append_batch(&entries[..2]).unwrap();

        let gapped = vec![entries[2].clone(), entries[4].clone()];
        let err = store.append_batch(&gapped).unwrap_err();
        assert_eq!(err, StoreError::OutOfOrder { expected: 3, found: 4 });
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_rejects_batch_not_following_tip() {
        let store = MemoryStore::new();
        let entries = chain(5);
        store.append_batch(&entries[..2]).unwrap();
        let err = store.append_batch(&entries[3..]).unwrap_err();
        assert_eq!(err, StoreError::OutOfOrder { expected: 2, found: 3 });
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let store = MemoryStore::new();
        store.append_batch(&[]).unwrap();
        assert_eq!(store.stats().batches, 0);
    }

    #[test]
    fn test_stats() {
        let store = MemoryStore::new();
        store.append_batch(&chain(4)).unwrap();
        store.read_range(0, 10).unwrap();

        let stats = store.stats();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.entries_written, 4);
        assert_eq!(stats.reads, 1);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Duplicate { index: 7 };
        assert!(err.to_string().contains("7"));
    }
}
