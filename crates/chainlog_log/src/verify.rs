//! Chain verification.
//!
//! Walks entries in index order, recomputing the expected chain. Stops at the
//! first divergence: everything after it is unverifiable against a broken
//! chain.

use chainlog_core::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entry::LogEntry;

/// Class of chain divergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// Recomputed digest differs from the stored `entry_hash`
    Hash,
    /// Stored `prev_hash` differs from the previous entry's `entry_hash`
    Chain,
    /// Gap or duplicate in the index sequence
    Contiguity,
}

impl DivergenceKind {
    /// Short name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Chain => "chain",
            Self::Contiguity => "contiguity",
        }
    }
}

impl fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First point where stored data disagrees with the recomputed chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    /// Sequence position where the divergence was found
    pub index: u64,
    /// What kind of divergence
    pub kind: DivergenceKind,
    /// Expected value (digest hex or index)
    pub expected: String,
    /// Stored value (digest hex or index)
    pub found: String,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mismatch at index {} (expected {}, found {})",
            self.kind, self.index, self.expected, self.found
        )
    }
}

/// Result of an audit. A value, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True only if every scanned entry checked out
    pub ok: bool,
    /// Entries that passed all checks
    pub checked: u64,
    /// Highest index that passed
    pub last_index: Option<u64>,
    /// First divergence, if any
    pub divergence: Option<Divergence>,
}

impl VerificationReport {
    /// Whether the chain verified
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.ok
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.divergence {
            None => write!(f, "chain intact: {} entries verified", self.checked),
            Some(d) => write!(f, "chain broken after {} entries: {}", self.checked, d),
        }
    }
}

/// Incremental chain checker
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    expected_index: u64,
    expected_prev: Hash,
    checked: u64,
    last_index: Option<u64>,
}

impl ChainVerifier {
    /// Verifier for a full chain: index 0, predecessor genesis
    #[must_use]
    pub fn new() -> Self {
        Self::anchored(0, Hash::GENESIS)
    }

    /// Verifier for a window starting at `index` whose predecessor digest is
    /// `prev_hash`
    #[must_use]
    pub fn anchored(index: u64, prev_hash: Hash) -> Self {
        Self {
            expected_index: index,
            expected_prev: prev_hash,
            checked: 0,
            last_index: None,
        }
    }

    /// Check the next entry in scan order, without lookahead.
    ///
    /// # Errors
    ///
    /// Returns the divergence if the entry does not continue the chain
    pub fn check(&mut self, entry: &LogEntry) -> Result<(), Divergence> {
        self.check_with_next(entry, None)
    }

    /// Check the next entry in scan order, given the entry scanned after it.
    ///
    /// Contiguity is checked first, then the chain link, then the digest. An
    /// entry that runs ahead of its position while `next` fills that position
    /// is a reordering, not a gap, and is reported as a chain mismatch.
    ///
    /// # Errors
    ///
    /// Returns the divergence if the entry does not continue the chain
    pub fn check_with_next(
        &mut self,
        entry: &LogEntry,
        next: Option<&LogEntry>,
    ) -> Result<(), Divergence> {
        let position = self.expected_index;

        if entry.index != position {
            let reordered = entry.index > position && next.is_some_and(|n| n.index == position);
            return Err(if reordered {
                Divergence {
                    index: position,
                    kind: DivergenceKind::Chain,
                    expected: self.expected_prev.to_hex(),
                    found: entry.prev_hash.to_hex(),
                }
            } else {
                Divergence {
                    index: position,
                    kind: DivergenceKind::Contiguity,
                    expected: position.to_string(),
                    found: entry.index.to_string(),
                }
            });
        }

        if !entry.prev_hash.ct_eq(&self.expected_prev) {
            return Err(Divergence {
                index: position,
                kind: DivergenceKind::Chain,
                expected: self.expected_prev.to_hex(),
                found: entry.prev_hash.to_hex(),
            });
        }

        let recomputed = entry.recompute_hash(&self.expected_prev);
        if !entry.entry_hash.ct_eq(&recomputed) {
            return Err(Divergence {
                index: position,
                kind: DivergenceKind::Hash,
                expected: recomputed.to_hex(),
                found: entry.entry_hash.to_hex(),
            });
        }

        self.expected_prev = entry.entry_hash;
        self.expected_index += 1;
        self.checked += 1;
        self.last_index = Some(position);
        Ok(())
    }

    /// Entries that passed so far
    #[must_use]
    pub const fn checked(&self) -> u64 {
        self.checked
    }

    /// Index the next entry must carry
    #[must_use]
    pub const fn expected_index(&self) -> u64 {
        self.expected_index
    }

    /// Close out the audit
    #[must_use]
    pub fn finish(self, divergence: Option<Divergence>) -> VerificationReport {
        VerificationReport {
            ok: divergence.is_none(),
            checked: self.checked,
            last_index: self.last_index,
            divergence,
        }
    }

    /// Verify an in-memory sequence
    #[must_use]
    pub fn verify_entries<'a, I>(mut self, entries: I) -> VerificationReport
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        let mut entries = entries.into_iter().peekable();
        while let Some(entry) = entries.next() {
            if let Err(divergence) = self.check_with_next(entry, entries.peek().copied()) {
                return self.finish(Some(divergence));
            }
        }
        self.finish(None)
    }
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}
