//! Outcome logging middleware: the completion phase of the pipeline.
//!
//! Outermost layer. Creates the per-request store and capture slot, and once
//! the inner layers (instrumentation included) have finished, restores the
//! captured snapshot, emits the outcome log line from the repopulated store,
//! attaches the correlation response header, and guarantees cleanup before
//! the worker goes back to its pool.

use std::future::{ready, Ready};
use std::rc::Rc;
use std::time::Instant;

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{Error, HttpMessage};
use futures::future::LocalBoxFuture;

use correlation_core::{
    capture, keys, restore, store, AmbientStore, CleanupGuard, CorrelationStore, NoopSpanSource,
};

use crate::slot::CaptureSlot;

/// Configuration for the outcome layer.
#[derive(Debug, Clone)]
pub struct OutcomeConfig {
    /// Response header carrying the correlation id.
    pub response_header: String,
    /// Attach the header at all; disable for internal-only services.
    pub attach_response_header: bool,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self {
            response_header: "x-correlation-id".to_string(),
            attach_response_header: true,
        }
    }
}

/// Middleware that logs the request outcome with restored correlation
/// context.
///
/// ## Example
/// ```rust
/// use actix_correlation::{ChainCaptureMiddleware, OutcomeLogMiddleware};
/// use actix_web::App;
///
/// // Registration order matters: the outcome layer must be outermost.
/// let app = App::new()
///     .wrap(ChainCaptureMiddleware::with_otel())
///     .wrap(OutcomeLogMiddleware::default());
/// ```
#[derive(Default)]
pub struct OutcomeLogMiddleware {
    config: Rc<OutcomeConfig>,
}

impl OutcomeLogMiddleware {
    pub fn new(config: OutcomeConfig) -> Self {
        Self {
            config: Rc::new(config),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for OutcomeLogMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = OutcomeLogMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(OutcomeLogMiddlewareService {
            service,
            config: self.config.clone(),
        }))
    }
}

pub struct OutcomeLogMiddlewareService<S> {
    service: S,
    config: Rc<OutcomeConfig>,
}

impl<S, B> Service<ServiceRequest> for OutcomeLogMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let config = self.config.clone();
        let request_store = Rc::new(CorrelationStore::new());
        let slot = CaptureSlot::new();
        req.extensions_mut().insert(request_store.clone());
        req.extensions_mut().insert(slot.clone());

        let method = req.method().to_string();
        let path = req.path().to_string();
        let start = Instant::now();

        let fut = self.service.call(req);

        Box::pin(async move {
            let mut result = fut.await;

            let snapshot = slot.take().unwrap_or_else(|| {
                tracing::warn!(
                    method = %method,
                    path = %path,
                    "no capture arrived from the processing chain; capturing at completion"
                );
                // The runtime span has ended by now; only the store can help.
                capture(request_store.as_ref(), &NoopSpanSource)
            });

            let ambient: &dyn AmbientStore = request_store.as_ref();
            // Cleanup must run on every exit path from here on, including an
            // unwind out of the log emission below.
            let _cleanup = CleanupGuard::new(ambient);
            restore(ambient, &snapshot);

            let request_id = keys::resolve(ambient, keys::REQUEST_ID_KEYS)
                .unwrap_or_else(|| snapshot.request_id().to_string());
            let trace_id = keys::resolve(ambient, keys::TRACE_ID_KEYS);
            let span_id = keys::resolve(ambient, keys::SPAN_ID_KEYS);
            let degraded = ambient.get(keys::DEGRADED_KEY).is_some();
            let duration_ms = start.elapsed().as_millis() as u64;

            store::scope(request_store.clone(), || match &result {
                Ok(res) => tracing::info!(
                    method = %method,
                    path = %path,
                    status = res.status().as_u16(),
                    duration_ms,
                    request_id = %request_id,
                    trace_id = trace_id.as_deref().unwrap_or(""),
                    span_id = span_id.as_deref().unwrap_or(""),
                    degraded,
                    "request completed"
                ),
                Err(err) => tracing::info!(
                    method = %method,
                    path = %path,
                    duration_ms,
                    request_id = %request_id,
                    trace_id = trace_id.as_deref().unwrap_or(""),
                    span_id = span_id.as_deref().unwrap_or(""),
                    degraded,
                    error = %err,
                    "request failed"
                ),
            });

            if config.attach_response_header {
                if let Ok(res) = result.as_mut() {
                    attach_header(res, &config.response_header, &request_id);
                }
            }

            result
        })
    }
}

fn attach_header<B>(res: &mut ServiceResponse<B>, header: &str, request_id: &str) {
    match (
        HeaderName::from_bytes(header.as_bytes()),
        HeaderValue::from_str(request_id),
    ) {
        (Ok(name), Ok(value)) => {
            res.headers_mut().insert(name, value);
        }
        _ => tracing::warn!(header = %header, "could not attach correlation header"),
    }
}
