//! Lazy forward scans over a store.
//!
//! A [`Scan`] pulls fixed-size pages from the backend on demand, so walking
//! the whole chain never holds more than one page in memory.

use chainlog_log::LogEntry;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::store::{PersistentStore, StoreResult};

/// Default page size for store reads
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Forward iterator over persisted entries in index order.
///
/// Yields `Err` at most once; iteration ends after the first error.
pub struct Scan {
    store: Arc<dyn PersistentStore>,
    position: u64,
    page_size: usize,
    remaining: Option<u64>,
    buffer: VecDeque<LogEntry>,
    done: bool,
}

impl Scan {
    /// Scan starting at the first entry with `index >= from`
    #[must_use]
    pub fn new(store: Arc<dyn PersistentStore>, from: u64) -> Self {
        Self {
            store,
            position: from,
            page_size: DEFAULT_PAGE_SIZE,
            remaining: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Set the page size (minimum 1)
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Stop after `limit` entries
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.remaining = Some(limit);
        self
    }

    /// Index the next page will be read from
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    fn fill(&mut self) -> StoreResult<()> {
        let want = match self.remaining {
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX).min(self.page_size),
            None => self.page_size,
        };
        let page = self.store.read_range(self.position, want)?;
        if page.len() < want {
            self.done = true;
        }
        if let Some(last) = page.last() {
            self.position = last.index.saturating_add(1);
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for Scan {
    type Item = StoreResult<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        if self.buffer.is_empty() {
            if self.done {
                return None;
            }
            if let Err(err) = self.fill() {
                self.done = true;
                self.buffer.clear();
                return Some(Err(err));
            }
        }

        let entry = self.buffer.pop_front()?;
        if let Some(n) = self.remaining.as_mut() {
            *n -= 1;
        }
        Some(Ok(entry))
    }
}

impl std::fmt::Debug for Scan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scan")
            .field("position", &self.position)
            .field("page_size", &self.page_size)
            .field("remaining", &self.remaining)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
