//! Audit persisted chains.
//!
//! The auditor walks the store through a [`Scan`] and feeds every entry to a
//! [`ChainVerifier`]. Tampering produces a report, not an error; only a store
//! that cannot be read fails the call.

use chainlog_core::Hash;
use chainlog_log::{ChainVerifier, LogEntry, VerificationReport};
use std::sync::Arc;

use crate::scan::Scan;
use crate::store::{PersistentStore, StoreResult};

/// Re-verifies stored chains from scratch
pub struct AuditVerifier {
    store: Arc<dyn PersistentStore>,
    page_size: usize,
}

impl AuditVerifier {
    /// Create an auditor over `store`
    #[must_use]
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            store,
            page_size: crate::scan::DEFAULT_PAGE_SIZE,
        }
    }

    /// Page size for store reads
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Verify the whole chain from index 0 against genesis.
    ///
    /// # Errors
    ///
    /// Returns error only if the store cannot be read
    pub fn verify(&self) -> StoreResult<VerificationReport> {
        let scan = Scan::new(Arc::clone(&self.store), 0).with_page_size(self.page_size);
        let report = run(ChainVerifier::new(), scan)?;
        log_report(&report, "full");
        Ok(report)
    }

    /// Verify only the last `n` entries.
    ///
    /// A window reaching index 0 is anchored on genesis. Otherwise it is
    /// anchored on the stored `prev_hash` of its first entry, so tampering
    /// before the window is not detected.
    ///
    /// # Errors
    ///
    /// Returns error only if the store cannot be read
    pub fn verify_tail(&self, n: u64) -> StoreResult<VerificationReport> {
        let Some(tip) = self.store.tip()? else {
            return Ok(ChainVerifier::new().finish(None));
        };
        if n == 0 {
            return Ok(ChainVerifier::anchored(tip.index + 1, tip.entry_hash).finish(None));
        }

        let start = (tip.index + 1).saturating_sub(n);
        let anchor = if start == 0 {
            Hash::GENESIS
        } else {
            match self.store.read_range(start, 1)?.first() {
                Some(first) => first.prev_hash,
                None => tip.prev_hash,
            }
        };

        let scan = Scan::new(Arc::clone(&self.store), start)
            .with_page_size(self.page_size)
            .with_limit(n);
        let report = run(ChainVerifier::anchored(start, anchor), scan)?;
        log_report(&report, "tail");
        Ok(report)
    }
}

/// Feed entries to the verifier with one entry of lookahead, so a reordered
/// pair is told apart from a gap.
fn run(
    mut verifier: ChainVerifier,
    entries: impl Iterator<Item = StoreResult<LogEntry>>,
) -> StoreResult<VerificationReport> {
    let mut entries = entries.peekable();
    while let Some(entry) = entries.next() {
        let entry = entry?;
        let next = match entries.peek() {
            Some(Ok(next)) => Some(next),
            Some(Err(err)) => return Err(err.clone()),
            None => None,
        };
        if let Err(divergence) = verifier.check_with_next(&entry, next) {
            return Ok(verifier.finish(Some(divergence)));
        }
    }
    Ok(verifier.finish(None))
}

fn log_report(report: &VerificationReport, scope: &str) {
    match &report.divergence {
        None => tracing::info!(scope, checked = report.checked, "chain verified"),
        Some(d) => tracing::error!(
            scope,
            checked = report.checked,
            index = d.index,
            kind = %d.kind,
            "chain divergence detected"
        ),
    }
}
