//! redb-backed persistent store.
//!
//! One table maps `index -> version byte ‖ postcard(LogEntry)`. Every batch is
//! a single write transaction, so a failed or interrupted batch leaves nothing
//! behind.

use chainlog_log::LogEntry;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::{Path, PathBuf};

use crate::store::{PersistentStore, StoreError, StoreResult, check_batch};

/// Entry table: chain index to encoded entry
pub const ENTRIES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("entries");

macro_rules! backend_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(err: $ty) -> Self {
                    StoreError::backend(err)
                }
            }
        )*
    };
}

backend_error!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Row format version, stored as the first byte of every value
pub const FORMAT_VERSION: u8 = 1;

/// Encode an entry for storage
///
/// # Errors
///
/// Returns [`StoreError::Codec`] if serialization fails
pub fn encode_entry(entry: &LogEntry) -> StoreResult<Vec<u8>> {
    postcard::to_extend(entry, vec![FORMAT_VERSION]).map_err(|e| StoreError::Codec {
        reason: e.to_string(),
    })
}

/// Decode a stored entry
///
/// # Errors
///
/// Returns [`StoreError::Codec`] if the version byte is unknown or the body
/// is not a valid entry
pub fn decode_entry(bytes: &[u8]) -> StoreResult<LogEntry> {
    match bytes.split_first() {
        Some((&FORMAT_VERSION, body)) => {
            postcard::from_bytes(body).map_err(|e| StoreError::Codec {
                reason: e.to_string(),
            })
        }
        Some((version, _)) => Err(StoreError::Codec {
            reason: format!("unsupported entry format version {version}"),
        }),
        None => Err(StoreError::Codec {
            reason: "empty entry".to_string(),
        }),
    }
}

/// Persistent store backed by a redb file
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Create or open a store at the given path.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or database cannot be opened
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(&path)?;
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(ENTRIES_TABLE)?;
        }
        write_txn.commit()?;

        tracing::debug!(path = %path.display(), "opened redb store");
        Ok(Self { db, path })
    }

    /// Open a store that already exists, without creating the file or its
    /// table and without starting a write transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, is not a redb database, or has
    /// no entries table
    pub fn open_existing(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Database::open(&path)?;
        {
            let read_txn = db.begin_read()?;
            match read_txn.open_table(ENTRIES_TABLE) {
                Ok(_) => {}
                Err(redb::TableError::TableDoesNotExist(_)) => {
                    return Err(StoreError::Backend {
                        reason: format!("{} has no entries table", path.display()),
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::debug!(path = %path.display(), "opened existing redb store");
        Ok(Self { db, path })
    }

    /// Path of the database file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistentStore for RedbStore {
    fn append_batch(&self, entries: &[LogEntry]) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let encoded = entries
            .iter()
            .map(|e| encode_entry(e).map(|bytes| (e.index, bytes)))
            .collect::<StoreResult<Vec<_>>>()?;

        // Any early return drops the transaction, which aborts it.
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES_TABLE)?;
            let tip = table.last()?.map(|(key, _)| key.value());
            for entry in entries {
                if table.get(entry.index)?.is_some() {
                    return Err(StoreError::Duplicate { index: entry.index });
                }
            }
            check_batch(entries, tip)?;

            for (index, bytes) in &encoded {
                table.insert(*index, bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn read_range(&self, from: u64, limit: usize) -> StoreResult<Vec<LogEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES_TABLE)?;

        let mut page = Vec::with_capacity(limit.min(1024));
        for item in table.range(from..)?.take(limit) {
            let (_key, value) = item?;
            page.push(decode_entry(value.value())?);
        }
        Ok(page)
    }

    fn tip(&self) -> StoreResult<Option<LogEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES_TABLE)?;
        match table.last()? {
            Some((_key, value)) => Ok(Some(decode_entry(value.value())?)),
            None => Ok(None),
        }
    }

    fn count(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES_TABLE)?;
        Ok(table.len()?)
    }
}
