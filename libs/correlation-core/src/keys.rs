//! Historical key spellings for correlation fields.
//!
//! Several generations of log consumers read the ambient store under
//! different names for the same logical field. Lookups go through one
//! resolver over a prioritized alias list instead of ad hoc string literals.

use crate::store::{AmbientStore, StoreError};

/// Trace id spellings, highest priority first.
pub const TRACE_ID_KEYS: &[&str] = &["traceId", "trace_id", "X-B3-TraceId"];

/// Span id spellings, highest priority first.
pub const SPAN_ID_KEYS: &[&str] = &["spanId", "span_id", "X-B3-SpanId"];

/// Request/correlation id spellings, highest priority first.
pub const REQUEST_ID_KEYS: &[&str] = &["requestId", "request_id", "correlationId", "x-request-id"];

/// Marker set when a capture or restore had to degrade.
pub const DEGRADED_KEY: &str = "tracingDegraded";

/// Human-readable cause accompanying [`DEGRADED_KEY`].
pub const DEGRADATION_REASON_KEY: &str = "degradationReason";

/// Returns the first non-empty value found under `aliases`, in priority order.
pub fn resolve(store: &dyn AmbientStore, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .filter_map(|key| store.get(key))
        .find(|value| !value.is_empty())
}

/// Writes `value` under every spelling in `aliases`.
pub fn write_all(store: &dyn AmbientStore, aliases: &[&str], value: &str) -> Result<(), StoreError> {
    for key in aliases {
        store.put(key, value)?;
    }
    Ok(())
}
