//! Snapshot restore.
//!
//! Writes a captured snapshot back into the ambient store so the outcome
//! logger observes the same identifiers the request logger saw. Clears
//! first: restoring must never merge with stale leftovers from the
//! instrumentation teardown.

use uuid::Uuid;

use crate::keys;
use crate::metrics::{self, ConsistencyIssue};
use crate::snapshot::CorrelationSnapshot;
use crate::store::{AmbientStore, StoreError};

/// How far a restore got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Every ambient entry and all canonical spellings were written back.
    Full,
    /// Only the request id could be written.
    RequestIdOnly,
    /// Nothing from the snapshot could be written; carries the synthesized
    /// emergency id.
    Emergency(String),
}

impl RestoreOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            RestoreOutcome::Full => "full",
            RestoreOutcome::RequestIdOnly => "request_id_only",
            RestoreOutcome::Emergency(_) => "emergency",
        }
    }
}

/// Repopulates `store` from `snapshot`. Never raises: failures degrade to a
/// request-id-only restore, then to a synthesized emergency id.
pub fn restore(store: &dyn AmbientStore, snapshot: &CorrelationSnapshot) -> RestoreOutcome {
    let outcome = match try_restore(store, snapshot) {
        Ok(()) => RestoreOutcome::Full,
        Err(err) => {
            ConsistencyIssue::RestoreFailure(err.to_string()).record();
            match restore_request_id_only(store, snapshot.request_id()) {
                Ok(()) => {
                    ConsistencyIssue::PartialRestore.record();
                    RestoreOutcome::RequestIdOnly
                }
                Err(_) => emergency_restore(store),
            }
        }
    };
    metrics::CONTEXT_RESTORES_TOTAL
        .with_label_values(&[outcome.as_label()])
        .inc();
    outcome
}

fn try_restore(store: &dyn AmbientStore, snapshot: &CorrelationSnapshot) -> Result<(), StoreError> {
    store.clear()?;
    for (key, value) in snapshot.ambient() {
        store.put(key, value)?;
    }
    // Rewrite the canonical fields under every historical spelling, even when
    // the ambient copy already carried some of them.
    if let Some(trace_id) = snapshot.trace_id() {
        keys::write_all(store, keys::TRACE_ID_KEYS, trace_id)?;
    }
    if let Some(span_id) = snapshot.span_id() {
        keys::write_all(store, keys::SPAN_ID_KEYS, span_id)?;
    }
    keys::write_all(store, keys::REQUEST_ID_KEYS, snapshot.request_id())?;
    Ok(())
}

fn restore_request_id_only(store: &dyn AmbientStore, request_id: &str) -> Result<(), StoreError> {
    // Best-effort clear; the partial writes from the failed attempt should
    // not survive, but a failing clear must not block the id write.
    let _ = store.clear();
    keys::write_all(store, keys::REQUEST_ID_KEYS, request_id)
}

fn emergency_restore(store: &dyn AmbientStore) -> RestoreOutcome {
    let emergency_id = Uuid::new_v4().to_string();
    let _ = keys::write_all(store, keys::REQUEST_ID_KEYS, &emergency_id);
    let _ = store.put(keys::DEGRADED_KEY, "true");
    let _ = store.put(keys::DEGRADATION_REASON_KEY, "context restore failed");
    RestoreOutcome::Emergency(emergency_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::capture;
    use crate::span_source::NoopSpanSource;
    use crate::store::CorrelationStore;
    use std::cell::Cell;
    use std::collections::BTreeMap;

    /// Store double whose writes fail for keys outside an allowlist.
    struct SelectiveStore {
        inner: CorrelationStore,
        allow: &'static [&'static str],
    }

    impl SelectiveStore {
        fn new(allow: &'static [&'static str]) -> Self {
            Self {
                inner: CorrelationStore::new(),
                allow,
            }
        }
    }

    impl AmbientStore for SelectiveStore {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }
        fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if self.allow.contains(&key) {
                self.inner.put(key, value)
            } else {
                Err(StoreError::Backend {
                    operation: "put",
                    reason: format!("write rejected for {key}"),
                })
            }
        }
        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
        fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear()
        }
        fn snapshot(&self) -> Result<BTreeMap<String, String>, StoreError> {
            self.inner.snapshot()
        }
        fn keys(&self) -> Vec<String> {
            self.inner.keys()
        }
    }

    /// Store double that rejects every write.
    struct ReadOnlyStore {
        clears: Cell<usize>,
    }

    impl ReadOnlyStore {
        fn new() -> Self {
            Self { clears: Cell::new(0) }
        }
    }

    impl AmbientStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Option<String> {
            None
        }
        fn put(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend {
                operation: "put",
                reason: "read-only".to_string(),
            })
        }
        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend {
                operation: "remove",
                reason: "read-only".to_string(),
            })
        }
        fn clear(&self) -> Result<(), StoreError> {
            self.clears.set(self.clears.get() + 1);
            Err(StoreError::Backend {
                operation: "clear",
                reason: "read-only".to_string(),
            })
        }
        fn snapshot(&self) -> Result<BTreeMap<String, String>, StoreError> {
            Ok(BTreeMap::new())
        }
        fn keys(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn populated_snapshot() -> CorrelationSnapshot {
        let store = CorrelationStore::new();
        store.put("traceId", "t1").unwrap();
        store.put("spanId", "s1").unwrap();
        store.put("requestId", "r1").unwrap();
        store.put("tenant", "acme").unwrap();
        capture(&store, &NoopSpanSource)
    }

    #[test]
    fn round_trip_reproduces_canonical_fields() {
        let store = CorrelationStore::new();
        store.put("traceId", "t1").unwrap();
        store.put("spanId", "s1").unwrap();
        store.put("requestId", "r1").unwrap();

        let snapshot = capture(&store, &NoopSpanSource);
        store.clear().unwrap();

        assert_eq!(restore(&store, &snapshot), RestoreOutcome::Full);
        assert_eq!(store.get("traceId"), Some("t1".to_string()));
        assert_eq!(store.get("spanId"), Some("s1".to_string()));
        assert_eq!(store.get("requestId"), Some("r1".to_string()));
    }

    #[test]
    fn all_historical_spellings_are_written() {
        let store = CorrelationStore::new();
        let snapshot = populated_snapshot();

        restore(&store, &snapshot);
        for key in keys::TRACE_ID_KEYS {
            assert_eq!(store.get(key), Some("t1".to_string()), "missing {key}");
        }
        for key in keys::SPAN_ID_KEYS {
            assert_eq!(store.get(key), Some("s1".to_string()), "missing {key}");
        }
        for key in keys::REQUEST_ID_KEYS {
            assert_eq!(store.get(key), Some("r1".to_string()), "missing {key}");
        }
        assert_eq!(store.get("tenant"), Some("acme".to_string()));
    }

    #[test]
    fn restore_does_not_merge_with_stale_state() {
        let store = CorrelationStore::new();
        store.put("leftover", "junk").unwrap();

        restore(&store, &populated_snapshot());
        assert_eq!(store.get("leftover"), None);
    }

    #[test]
    fn absent_trace_means_absent_after_restore() {
        let source_store = CorrelationStore::new();
        source_store.put("requestId", "r9").unwrap();
        let snapshot = capture(&source_store, &NoopSpanSource);

        let store = CorrelationStore::new();
        restore(&store, &snapshot);
        assert_eq!(store.get("traceId"), None);
        assert_eq!(store.get("requestId"), Some("r9".to_string()));
    }

    #[test]
    fn rejected_ambient_writes_degrade_to_request_id_only() {
        let store = SelectiveStore::new(keys::REQUEST_ID_KEYS);
        let outcome = restore(&store, &populated_snapshot());

        assert_eq!(outcome, RestoreOutcome::RequestIdOnly);
        assert_eq!(store.get("requestId"), Some("r1".to_string()));
        assert_eq!(store.get("tenant"), None);
    }

    #[test]
    fn fully_rejecting_store_ends_in_emergency() {
        let store = ReadOnlyStore::new();
        let outcome = restore(&store, &populated_snapshot());

        match outcome {
            RestoreOutcome::Emergency(id) => assert!(Uuid::parse_str(&id).is_ok()),
            other => panic!("expected emergency outcome, got {other:?}"),
        }
        assert!(store.clears.get() >= 1);
    }
}
