//! Snapshot capture.
//!
//! Reads the current span context and the ambient store into an immutable
//! [`CorrelationSnapshot`]. Must run between the downstream chain returning
//! and the instrumentation teardown wiping the store, so it can never fail
//! and never block: every internal error degrades to the next strategy,
//! terminating in an emergency snapshot that always constructs.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;
use uuid::Uuid;

use crate::keys;
use crate::metrics::{self, ConsistencyIssue};
use crate::snapshot::{CaptureSource, CorrelationSnapshot};
use crate::span_source::{SpanContextSource, SpanSourceError};
use crate::store::{AmbientStore, StoreError};

#[derive(Debug, Error)]
enum CaptureError {
    #[error("span source failed: {0}")]
    Source(#[from] SpanSourceError),
    #[error("span source panicked")]
    SourcePanic,
    #[error("store snapshot failed: {0}")]
    Store(#[from] StoreError),
}

/// Captures the current correlation context. Never fails, never blocks, and
/// is read-only with respect to the store.
pub fn capture(store: &dyn AmbientStore, spans: &dyn SpanContextSource) -> CorrelationSnapshot {
    match try_capture(store, spans) {
        Ok(snapshot) => {
            metrics::CONTEXT_CAPTURES_TOTAL
                .with_label_values(&[snapshot.source().as_label()])
                .inc();
            if !snapshot.is_valid() {
                ConsistencyIssue::FallbackUsed.record();
            }
            snapshot
        }
        Err(err) => degraded(store, &err),
    }
}

fn try_capture(
    store: &dyn AmbientStore,
    spans: &dyn SpanContextSource,
) -> Result<CorrelationSnapshot, CaptureError> {
    // The span source is third-party code; contain unwinds as well as errors.
    let active = match catch_unwind(AssertUnwindSafe(|| spans.current_span())) {
        Ok(result) => result?,
        Err(_) => return Err(CaptureError::SourcePanic),
    };

    let (trace_id, span_id, valid, source) = match active {
        Some(span) => (
            Some(span.trace_id),
            Some(span.span_id),
            true,
            CaptureSource::TracingRuntime,
        ),
        None => {
            let trace_id = keys::resolve(store, keys::TRACE_ID_KEYS);
            let span_id = keys::resolve(store, keys::SPAN_ID_KEYS);
            let source = if trace_id.is_some() {
                CaptureSource::StoreFallback
            } else {
                CaptureSource::Synthesized
            };
            (trace_id, span_id, false, source)
        }
    };

    let request_id = keys::resolve(store, keys::REQUEST_ID_KEYS)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let ambient = store.snapshot()?;

    Ok(CorrelationSnapshot::new(
        trace_id, span_id, request_id, ambient, valid, source,
    ))
}

/// Degraded capture: reuse whatever the store still yields, synthesize the
/// rest, and tag the snapshot so the outcome logger can tell.
fn degraded(store: &dyn AmbientStore, cause: &CaptureError) -> CorrelationSnapshot {
    metrics::CONTEXT_CAPTURE_DEGRADED_TOTAL.inc();
    ConsistencyIssue::CaptureFailure(cause.to_string()).record();

    let attempt = catch_unwind(AssertUnwindSafe(|| {
        let request_id = keys::resolve(store, keys::REQUEST_ID_KEYS)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut ambient = store.snapshot().unwrap_or_default();
        tag_degraded(&mut ambient, cause);
        CorrelationSnapshot::new(
            None,
            None,
            request_id,
            ambient,
            false,
            CaptureSource::Synthesized,
        )
    }));

    attempt.unwrap_or_else(|_| emergency(cause))
}

/// Absolute-minimum snapshot: a synthesized id plus the degradation markers.
fn emergency(cause: &CaptureError) -> CorrelationSnapshot {
    let mut ambient = BTreeMap::new();
    tag_degraded(&mut ambient, cause);
    CorrelationSnapshot::new(
        None,
        None,
        Uuid::new_v4().to_string(),
        ambient,
        false,
        CaptureSource::Synthesized,
    )
}

fn tag_degraded(ambient: &mut BTreeMap<String, String>, cause: &CaptureError) {
    ambient.insert(keys::DEGRADED_KEY.to_string(), "true".to_string());
    ambient.insert(keys::DEGRADATION_REASON_KEY.to_string(), cause.to_string());
}
