//! Access to the tracing runtime's current span context.
//!
//! The runtime is a black box: it may be absent, stale, or fail outright.
//! Implementations report that through `Result`; the capture path
//! additionally contains panics escaping this boundary.

use opentelemetry::trace::TraceContextExt;
use thiserror::Error;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Identifiers of the span active on the current thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSpan {
    pub trace_id: String,
    pub span_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpanSourceError {
    #[error("span context unavailable: {0}")]
    Unavailable(String),
}

/// Exposes the current span context, if any.
///
/// `Ok(None)` means no valid context exists; `Err` means the runtime itself
/// failed to answer.
pub trait SpanContextSource {
    fn current_span(&self) -> Result<Option<ActiveSpan>, SpanSourceError>;
}

/// Source for services that run without a tracing runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSpanSource;

impl SpanContextSource for NoopSpanSource {
    fn current_span(&self) -> Result<Option<ActiveSpan>, SpanSourceError> {
        Ok(None)
    }
}

/// Reads the OpenTelemetry span context attached to the current `tracing`
/// span. Yields `None` unless the context reports itself valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtelSpanSource;

impl SpanContextSource for OtelSpanSource {
    fn current_span(&self) -> Result<Option<ActiveSpan>, SpanSourceError> {
        let context = tracing::Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            Ok(Some(ActiveSpan {
                trace_id: span_context.trace_id().to_string(),
                span_id: span_context.span_id().to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}
