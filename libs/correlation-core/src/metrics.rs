//! Consistency metrics and the issue taxonomy behind them.

use prometheus::{IntCounter, IntCounterVec};
use thiserror::Error;

lazy_static::lazy_static! {
    pub static ref CONTEXT_CAPTURES_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "context_captures_total",
        "Context snapshot captures by trace id source",
        &["source"]
    ).unwrap();

    pub static ref CONTEXT_CAPTURE_DEGRADED_TOTAL: IntCounter = prometheus::register_int_counter!(
        "context_capture_degraded_total",
        "Captures that fell back to a degraded or emergency snapshot"
    ).unwrap();

    pub static ref CONTEXT_RESTORES_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "context_restores_total",
        "Context restores by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref CONTEXT_CLEANUPS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "context_cleanups_total",
        "Store cleanups by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref CONTEXT_LEAKS_DETECTED_TOTAL: IntCounter = prometheus::register_int_counter!(
        "context_leaks_detected_total",
        "Cleanups that left residual keys behind"
    ).unwrap();

    pub static ref COMMIT_HOOK_TRIGGERS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "context_commit_hook_triggers_total",
        "Backup captures at response commit, by result",
        &["result"]
    ).unwrap();

    pub static ref CONSISTENCY_ISSUES_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "context_consistency_issues_total",
        "Recovered context bookkeeping anomalies by kind",
        &["kind"]
    ).unwrap();
}

/// Context bookkeeping anomaly, severity ascending.
///
/// None of these ever reach the request caller; each is recovered locally,
/// logged at its severity, and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyIssue {
    #[error("valid trace context absent; synthesized correlation id in use")]
    FallbackUsed,
    #[error("only the request id could be restored")]
    PartialRestore,
    #[error("residual keys remained after cleanup: {residual:?}")]
    CleanupIncomplete { residual: Vec<String> },
    #[error("capture degraded internally: {0}")]
    CaptureFailure(String),
    #[error("restore degraded internally: {0}")]
    RestoreFailure(String),
}

impl ConsistencyIssue {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConsistencyIssue::FallbackUsed => "fallback_used",
            ConsistencyIssue::PartialRestore => "partial_restore",
            ConsistencyIssue::CleanupIncomplete { .. } => "cleanup_incomplete",
            ConsistencyIssue::CaptureFailure(_) => "capture_failure",
            ConsistencyIssue::RestoreFailure(_) => "restore_failure",
        }
    }

    /// Counts the issue and logs it at its severity.
    pub fn record(&self) {
        CONSISTENCY_ISSUES_TOTAL
            .with_label_values(&[self.as_label()])
            .inc();
        match self {
            ConsistencyIssue::FallbackUsed => tracing::info!(issue = self.as_label(), "{}", self),
            ConsistencyIssue::CleanupIncomplete { .. } => {
                tracing::error!(issue = self.as_label(), "{}", self)
            }
            _ => tracing::warn!(issue = self.as_label(), "{}", self),
        }
    }
}
