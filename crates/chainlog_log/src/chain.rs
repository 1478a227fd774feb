//! Hash chain for tamper-evident logging.
//!
//! Each entry's `prev_hash` must match the previous entry's `entry_hash`, and
//! `entry_hash = SHA-256(canonical_record ‖ prev_hash_hex)`.

use chainlog_core::{Hash, Timestamp};

use crate::encoding::canonical_record;
use crate::entry::{LogData, LogEntry, Provisional};

/// Borrowed view of the hashed fields of one entry
#[derive(Debug, Clone, Copy)]
pub struct EntryFields<'a> {
    /// Chain position
    pub index: u64,
    /// Commit time
    pub timestamp: Timestamp,
    /// Level
    pub level: &'a str,
    /// Category
    pub category: &'a str,
    /// Message
    pub message: &'a str,
    /// Payload
    pub data: &'a LogData,
}

impl EntryFields<'_> {
    /// Digest of these fields chained onto `prev_hash`
    #[must_use]
    pub fn digest(&self, prev_hash: &Hash) -> Hash {
        HashChainer::hash(self, prev_hash)
    }
}

/// The chaining rule. Pure and stateless.
pub struct HashChainer;

impl HashChainer {
    /// `H(canonical(fields) ‖ prev_hash)`, with `prev_hash` as hex text
    #[must_use]
    pub fn hash(fields: &EntryFields<'_>, prev_hash: &Hash) -> Hash {
        let record = canonical_record(fields);
        Hash::compute_parts([record.as_bytes(), prev_hash.to_hex().as_bytes()])
    }
}

/// Chain head owned by exactly one writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    next_index: u64,
    last_hash: Hash,
    last_timestamp: Option<Timestamp>,
}

impl ChainState {
    /// Empty chain: next index 0, predecessor is genesis
    #[must_use]
    pub fn genesis() -> Self {
        Self {
            next_index: 0,
            last_hash: Hash::GENESIS,
            last_timestamp: None,
        }
    }

    /// Continue after the last persisted entry, or start from genesis
    #[must_use]
    pub fn resume(tip: Option<&LogEntry>) -> Self {
        match tip {
            Some(entry) => Self {
                next_index: entry.index + 1,
                last_hash: entry.entry_hash,
                last_timestamp: Some(entry.timestamp),
            },
            None => Self::genesis(),
        }
    }

    /// Index the next committed entry will receive
    #[must_use]
    pub const fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Digest of the most recent entry
    #[must_use]
    pub const fn tip(&self) -> Hash {
        self.last_hash
    }

    /// Number of entries in the chain so far
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.next_index
    }

    /// Whether nothing has been committed yet
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.next_index == 0
    }

    /// Assign index, timestamp and digests, then advance the head.
    ///
    /// The timestamp never goes backwards even if `now` does.
    pub fn commit(&mut self, record: Provisional, now: Timestamp) -> LogEntry {
        let timestamp = match self.last_timestamp {
            Some(last) => last.max(now),
            None => now,
        };
        let entry = record.finalize(self.next_index, timestamp, self.last_hash);

        self.next_index += 1;
        self.last_hash = entry.entry_hash;
        self.last_timestamp = Some(timestamp);
        entry
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::genesis()
    }
}
