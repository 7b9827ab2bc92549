//! Immutable capture of the ambient store plus derived tracing fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keys;

/// Where the trace identifiers in a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureSource {
    /// The tracing runtime reported a valid span context.
    TracingRuntime,
    /// No valid runtime context; a trace id was recovered from the ambient
    /// store under a historical spelling.
    StoreFallback,
    /// Nothing recoverable; identifiers were synthesized.
    Synthesized,
}

impl CaptureSource {
    pub fn as_label(&self) -> &'static str {
        match self {
            CaptureSource::TracingRuntime => "tracing_runtime",
            CaptureSource::StoreFallback => "store_fallback",
            CaptureSource::Synthesized => "synthesized",
        }
    }
}

/// Point-in-time capture of per-request correlation context.
///
/// Snapshots are immutable: fallback and retry paths construct a new value
/// instead of mutating an existing one. The ambient map is a defensive copy
/// and never contains an empty-string key; the request id is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSnapshot {
    trace_id: Option<String>,
    span_id: Option<String>,
    request_id: String,
    ambient: BTreeMap<String, String>,
    captured_at_millis: i64,
    valid: bool,
    source: CaptureSource,
}

impl CorrelationSnapshot {
    /// Builds a snapshot, enforcing the field invariants: empty ambient keys
    /// are dropped and an empty request id is replaced with a fresh UUID.
    pub fn new(
        trace_id: Option<String>,
        span_id: Option<String>,
        request_id: String,
        mut ambient: BTreeMap<String, String>,
        valid: bool,
        source: CaptureSource,
    ) -> Self {
        ambient.retain(|key, _| !key.is_empty());
        let request_id = if request_id.trim().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            request_id
        };
        Self {
            trace_id: trace_id.filter(|id| !id.is_empty()),
            span_id: span_id.filter(|id| !id.is_empty()),
            request_id,
            ambient,
            captured_at_millis: chrono::Utc::now().timestamp_millis(),
            valid,
            source,
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn span_id(&self) -> Option<&str> {
        self.span_id.as_deref()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn ambient(&self) -> &BTreeMap<String, String> {
        &self.ambient
    }

    pub fn captured_at_millis(&self) -> i64 {
        self.captured_at_millis
    }

    /// True only when the trace id came from the tracing runtime itself.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn source(&self) -> CaptureSource {
        self.source
    }

    /// True when the capture or an earlier restore had to degrade.
    pub fn is_degraded(&self) -> bool {
        self.ambient.contains_key(keys::DEGRADED_KEY)
    }
}
