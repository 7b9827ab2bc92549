//! Backup capture at response commit.
//!
//! Wraps the response body so the first poll — the actix moment closest to
//! "the response is being committed" — can still trigger a capture when the
//! normal chain-completion path was bypassed. The wrapper never changes the
//! byte stream, its size, or its timing.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use actix_web::body::{BodySize, MessageBody};
use actix_web::web::Bytes;
use pin_project::pin_project;

use correlation_core::{capture, metrics, CorrelationStore, SpanContextSource};

use crate::slot::CaptureSlot;

/// One-shot backup trigger. Firing is a no-op when the primary capture
/// already happened.
pub(crate) struct CommitHook {
    slot: CaptureSlot,
    store: Rc<CorrelationStore>,
    spans: Rc<dyn SpanContextSource>,
}

impl CommitHook {
    pub(crate) fn new(
        slot: CaptureSlot,
        store: Rc<CorrelationStore>,
        spans: Rc<dyn SpanContextSource>,
    ) -> Self {
        Self { slot, store, spans }
    }

    fn fire(self) {
        if self.slot.is_captured() {
            metrics::COMMIT_HOOK_TRIGGERS_TOTAL
                .with_label_values(&["redundant"])
                .inc();
            return;
        }

        metrics::COMMIT_HOOK_TRIGGERS_TOTAL
            .with_label_values(&["backup_capture"])
            .inc();
        tracing::warn!("no capture before response commit; taking backup capture");

        match catch_unwind(AssertUnwindSafe(|| {
            capture(self.store.as_ref(), self.spans.as_ref())
        })) {
            Ok(snapshot) => {
                self.slot.offer(snapshot);
            }
            Err(_) => tracing::warn!("backup capture panicked; response is unaffected"),
        }
    }
}

/// Response body decorator carrying the commit hook.
#[pin_project]
pub struct CommitHookBody<B> {
    #[pin]
    inner: B,
    hook: Option<CommitHook>,
}

impl<B> CommitHookBody<B> {
    pub(crate) fn new(inner: B, hook: CommitHook) -> Self {
        Self {
            inner,
            hook: Some(hook),
        }
    }
}

impl<B> MessageBody for CommitHookBody<B>
where
    B: MessageBody,
{
    type Error = B::Error;

    fn size(&self) -> BodySize {
        self.inner.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        let this = self.project();
        if let Some(hook) = this.hook.take() {
            hook.fire();
        }
        this.inner.poll_next(cx)
    }
}
