//! Store cleanup — the leak-prevention authority.
//!
//! The worker thread goes back to its pool after every request; whatever the
//! store still holds at that point bleeds into the next request handled on
//! the same worker. Cleanup therefore verifies emptiness, retries per key
//! when a bulk clear fails, and on total failure reports the leak risk but
//! never aborts the request.

use crate::metrics::{self, ConsistencyIssue};
use crate::store::AmbientStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The bulk clear left the store empty.
    Clean,
    /// Bulk clear failed or left entries; per-key removal finished the job.
    RecoveredPerKey { removed: usize },
    /// Entries survived both passes; the next request on this worker may
    /// observe leaked context.
    LeakRisk { residual: Vec<String> },
}

impl CleanupOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            CleanupOutcome::Clean => "clean",
            CleanupOutcome::RecoveredPerKey { .. } => "recovered_per_key",
            CleanupOutcome::LeakRisk { .. } => "leak_risk",
        }
    }
}

/// Empties `store`, verifying the result. Never fails; the worst outcome is
/// a reported leak risk.
pub fn cleanup(store: &dyn AmbientStore) -> CleanupOutcome {
    let keys_before = store.keys();

    if let Err(err) = store.clear() {
        tracing::warn!(error = %err, "bulk clear of the correlation store failed");
    }

    let outcome = match store.keys() {
        remaining if remaining.is_empty() => CleanupOutcome::Clean,
        remaining => {
            let mut removed = 0usize;
            for key in &remaining {
                match store.remove(key) {
                    Ok(()) => removed += 1,
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "per-key removal failed")
                    }
                }
            }
            let residual = store.keys();
            if residual.is_empty() {
                tracing::warn!(
                    removed,
                    entries_before = keys_before.len(),
                    "bulk clear left entries behind; removed them individually"
                );
                CleanupOutcome::RecoveredPerKey { removed }
            } else {
                metrics::CONTEXT_LEAKS_DETECTED_TOTAL.inc();
                ConsistencyIssue::CleanupIncomplete {
                    residual: residual.clone(),
                }
                .record();
                CleanupOutcome::LeakRisk { residual }
            }
        }
    };

    metrics::CONTEXT_CLEANUPS_TOTAL
        .with_label_values(&[outcome.as_label()])
        .inc();
    outcome
}

/// Runs [`cleanup`] when dropped.
///
/// Holding one across the restore/log window turns cleanup into a guaranteed
/// finalizer: it fires on normal completion, on early return, and on unwind.
pub struct CleanupGuard<'a> {
    store: &'a dyn AmbientStore,
}

impl<'a> CleanupGuard<'a> {
    pub fn new(store: &'a dyn AmbientStore) -> Self {
        Self { store }
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        let _ = cleanup(self.store);
    }
}
