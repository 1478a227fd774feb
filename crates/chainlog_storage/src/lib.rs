//! chainlog Storage
//!
//! Append-only entry persistence, lazy scans, and chain auditing.
//! Every batch lands atomically or not at all.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod redb_store;
pub mod scan;
pub mod store;

pub use audit::AuditVerifier;
pub use redb_store::{ENTRIES_TABLE, FORMAT_VERSION, RedbStore, decode_entry, encode_entry};
pub use scan::{DEFAULT_PAGE_SIZE, Scan};
pub use store::{MemoryStore, PersistentStore, StoreError, StoreResult, StoreStats, check_batch};
