//! # Correlation Core
//!
//! Framework-free request-context preservation pipeline: captures ephemeral
//! tracing and correlation identifiers before an instrumentation layer tears
//! them down, and restores them so outcome logging can emit the same
//! identifiers as the original request log.
//!
//! ## Modules
//! - `store`: the ambient correlation store abstraction and default impl
//! - `keys`: historical key spellings and the alias resolver
//! - `snapshot`: the immutable [`CorrelationSnapshot`] value
//! - `capture`: snapshot capture with multi-level degradation
//! - `restore`: snapshot restore with partial-failure fallback
//! - `cleanup`: store cleanup, verification, and the RAII finalizer
//! - `span_source`: access to the tracing runtime's current span context
//! - `metrics`: consistency counters and the recovered-issue taxonomy
//!
//! No operation in this crate fails toward the caller: capture, restore, and
//! cleanup each end in a guaranteed-success terminal case and report what
//! happened through tagged outcomes, logs, and counters.

pub mod capture;
pub mod cleanup;
pub mod keys;
pub mod metrics;
pub mod restore;
pub mod snapshot;
pub mod span_source;
pub mod store;

pub use capture::capture;
pub use cleanup::{cleanup, CleanupGuard, CleanupOutcome};
pub use metrics::ConsistencyIssue;
pub use restore::{restore, RestoreOutcome};
pub use snapshot::{CaptureSource, CorrelationSnapshot};
pub use span_source::{ActiveSpan, NoopSpanSource, OtelSpanSource, SpanContextSource, SpanSourceError};
pub use store::{AmbientStore, CorrelationStore, StoreError};
