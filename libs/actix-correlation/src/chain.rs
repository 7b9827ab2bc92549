//! Chain-wrapping middleware: the primary capture point.
//!
//! Decorates the downstream invocation so the capture runs at exactly the
//! right instant: after the inner service resolves (success, error, or
//! unwind) and before control returns outward to whatever instrumentation
//! tears the store down. Capture failures are swallowed; the downstream
//! outcome always propagates unchanged.

use std::future::{ready, Ready};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use actix_web::body::MessageBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error;
use futures::future::LocalBoxFuture;

use correlation_core::{capture, CorrelationStore, OtelSpanSource, SpanContextSource};

use crate::commit::{CommitHook, CommitHookBody};
use crate::slot::CaptureSlot;
use crate::{shared_slot, shared_store};

/// Middleware that captures the correlation context when the downstream
/// chain returns.
///
/// ## Example
/// ```rust
/// use actix_correlation::ChainCaptureMiddleware;
/// use actix_web::App;
///
/// let app = App::new().wrap(ChainCaptureMiddleware::with_otel());
/// ```
pub struct ChainCaptureMiddleware {
    spans: Rc<dyn SpanContextSource>,
}

impl ChainCaptureMiddleware {
    pub fn new(spans: impl SpanContextSource + 'static) -> Self {
        Self {
            spans: Rc::new(spans),
        }
    }

    /// Captures from the OpenTelemetry context of the current `tracing` span.
    pub fn with_otel() -> Self {
        Self::new(OtelSpanSource)
    }
}

impl<S, B> Transform<S, ServiceRequest> for ChainCaptureMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<CommitHookBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = ChainCaptureMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ChainCaptureMiddlewareService {
            service,
            spans: self.spans.clone(),
        }))
    }
}

pub struct ChainCaptureMiddlewareService<S> {
    service: S,
    spans: Rc<dyn SpanContextSource>,
}

impl<S, B> Service<ServiceRequest> for ChainCaptureMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<CommitHookBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let spans = self.spans.clone();
        let slot = shared_slot(&req);
        let store = shared_store(&req);
        slot.mark_invoked();

        let fut = self.service.call(req);

        Box::pin(async move {
            let trigger = CaptureTrigger::new(slot.clone(), store.clone(), spans.clone());
            let result = fut.await;
            trigger.fire();

            result.map(|res| {
                res.map_body(|_, body| {
                    CommitHookBody::new(body, CommitHook::new(slot, store, spans))
                })
            })
        })
    }
}

/// Fires the primary capture exactly once.
///
/// Dropping an unfired trigger captures too, which covers unwinds escaping
/// the downstream future.
struct CaptureTrigger {
    slot: CaptureSlot,
    store: Rc<CorrelationStore>,
    spans: Rc<dyn SpanContextSource>,
    fired: bool,
}

impl CaptureTrigger {
    fn new(slot: CaptureSlot, store: Rc<CorrelationStore>, spans: Rc<dyn SpanContextSource>) -> Self {
        Self {
            slot,
            store,
            spans,
            fired: false,
        }
    }

    fn fire(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if self.fired {
            return;
        }
        self.fired = true;

        match catch_unwind(AssertUnwindSafe(|| {
            capture(self.store.as_ref(), self.spans.as_ref())
        })) {
            Ok(snapshot) => {
                self.slot.offer(snapshot);
            }
            Err(_) => tracing::warn!("context capture panicked; request outcome is unaffected"),
        }
    }
}

impl Drop for CaptureTrigger {
    fn drop(&mut self) {
        self.run();
    }
}
