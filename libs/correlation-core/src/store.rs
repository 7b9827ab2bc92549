//! Ambient correlation store.
//!
//! A thread-confined key/value store read by log consumers to enrich each log
//! line with request metadata. The pipeline never assumes a particular
//! backing implementation: everything goes through [`AmbientStore`], and the
//! mutating operations are fallible because some store implementations can
//! legitimately reject a bulk clear while writers are still flushing.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use thiserror::Error;

/// Failure raised by an ambient store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("empty keys are not allowed in the correlation store")]
    EmptyKey,
    #[error("store rejected {operation}: {reason}")]
    Backend {
        operation: &'static str,
        reason: String,
    },
}

/// Thread-confined key/value store holding per-request correlation context.
///
/// `get` and `keys` are infallible; mutators return [`StoreError`] so callers
/// can degrade step by step instead of unwinding.
pub trait AmbientStore {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
    /// Full defensive copy of the current entries.
    fn snapshot(&self) -> Result<BTreeMap<String, String>, StoreError>;
    fn keys(&self) -> Vec<String>;

    fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }
}

/// Default in-memory [`AmbientStore`].
///
/// Interior mutability keeps the handle shareable within one worker; the type
/// is `!Sync`, so two requests can never touch the same instance concurrently.
#[derive(Debug, Default)]
pub struct CorrelationStore {
    entries: RefCell<BTreeMap<String, String>>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AmbientStore for CorrelationStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.entries.borrow_mut().clear();
        Ok(())
    }

    fn snapshot(&self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.entries.borrow().clone())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }
}

thread_local! {
    static SCOPED: RefCell<Option<Rc<CorrelationStore>>> = const { RefCell::new(None) };
}

struct ScopeReset(Option<Rc<CorrelationStore>>);

impl Drop for ScopeReset {
    fn drop(&mut self) {
        let previous = self.0.take();
        SCOPED.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Publishes `store` to a thread-local slot for the duration of `f`.
///
/// Log consumers that cannot take a store handle (formatters, subscriber
/// layers) read it through [`try_with_scoped`]. The previous slot value is
/// reinstated on every exit path, including unwinding.
pub fn scope<R>(store: Rc<CorrelationStore>, f: impl FnOnce() -> R) -> R {
    let previous = SCOPED.with(|slot| slot.borrow_mut().replace(store));
    let _reset = ScopeReset(previous);
    f()
}

/// Runs `f` against the store published by the innermost [`scope`], if any.
pub fn try_with_scoped<R>(f: impl FnOnce(&CorrelationStore) -> R) -> Option<R> {
    let store = SCOPED.with(|slot| slot.borrow().clone());
    store.map(|store| f(&store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove_round_trip() {
        let store = CorrelationStore::new();
        store.put("requestId", "r1").unwrap();
        assert_eq!(store.get("requestId"), Some("r1".to_string()));

        store.remove("requestId").unwrap();
        assert_eq!(store.get("requestId"), None);
    }

    #[test]
    fn empty_key_is_rejected() {
        let store = CorrelationStore::new();
        assert_eq!(store.put("", "x"), Err(StoreError::EmptyKey));
    }

    #[test]
    fn snapshot_is_a_defensive_copy() {
        let store = CorrelationStore::new();
        store.put("traceId", "t1").unwrap();

        let copy = store.snapshot().unwrap();
        store.put("traceId", "mutated").unwrap();
        store.put("extra", "late").unwrap();

        assert_eq!(copy.get("traceId"), Some(&"t1".to_string()));
        assert!(!copy.contains_key("extra"));
    }

    #[test]
    fn clear_empties_the_store() {
        let store = CorrelationStore::new();
        store.put("a", "1").unwrap();
        store.put("b", "2").unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn scoped_store_is_visible_inside_scope_only() {
        let store = Rc::new(CorrelationStore::new());
        store.put("requestId", "r1").unwrap();

        assert!(try_with_scoped(|_| ()).is_none());
        let seen = scope(store, || {
            try_with_scoped(|s| s.get("requestId")).flatten()
        });
        assert_eq!(seen, Some("r1".to_string()));
        assert!(try_with_scoped(|_| ()).is_none());
    }

    #[test]
    fn scope_restores_previous_slot_on_unwind() {
        let outer = Rc::new(CorrelationStore::new());
        outer.put("requestId", "outer").unwrap();

        scope(outer, || {
            let inner = Rc::new(CorrelationStore::new());
            let result: Result<(), _> = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                || scope(inner, || panic!("boom")),
            ));
            assert!(result.is_err());

            let seen = try_with_scoped(|s| s.get("requestId")).flatten();
            assert_eq!(seen, Some("outer".to_string()));
        });
    }
}
