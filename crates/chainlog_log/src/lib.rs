//! chainlog Entries and Chain
//!
//! Canonical encoding, hash-chained, append-only log entries.
//! All entries are deterministically encoded so any re-verification path
//! recomputes exactly the digest the writer produced.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod encoding;
pub mod entry;
pub mod verify;

pub use chain::{ChainState, EntryFields, HashChainer};
pub use encoding::{canonical_data, canonical_record};
pub use entry::{LogData, LogEntry, Provisional, Value};
pub use verify::{ChainVerifier, Divergence, DivergenceKind, VerificationReport};
