//! # Actix Correlation
//!
//! Actix-web integration of the request-context preservation pipeline.
//!
//! ## Modules
//! - `chain`: chain-wrapping middleware performing the primary capture
//! - `commit`: response-body wrapper performing the backup capture
//! - `outcome`: outermost middleware restoring context for outcome logging
//! - `slot`: the per-request capture slot the three share
//!
//! ## Layering
//! The outcome layer must be outermost and the chain wrapper innermost, with
//! any auto-instrumentation in between, so the capture runs before the
//! instrumentation teardown and the restore runs after it:
//!
//! ```rust
//! use actix_correlation::{ChainCaptureMiddleware, OutcomeLogMiddleware};
//! use actix_web::App;
//!
//! let app = App::new()
//!     .wrap(ChainCaptureMiddleware::with_otel()) // innermost
//!     .wrap(OutcomeLogMiddleware::default());    // outermost
//! ```

use std::rc::Rc;

use actix_web::HttpMessage;

use correlation_core::{keys, AmbientStore, CorrelationStore};

pub mod chain;
pub mod commit;
pub mod outcome;
pub mod slot;

pub use chain::ChainCaptureMiddleware;
pub use commit::CommitHookBody;
pub use outcome::{OutcomeConfig, OutcomeLogMiddleware};
pub use slot::{CaptureSlot, ChainState};

/// Returns the request's ambient store, if the pipeline is installed.
pub fn request_store(msg: &impl HttpMessage) -> Option<Rc<CorrelationStore>> {
    msg.extensions().get::<Rc<CorrelationStore>>().cloned()
}

/// Reads the request's correlation id from the ambient store.
pub fn request_correlation_id(msg: &impl HttpMessage) -> Option<String> {
    let store = request_store(msg)?;
    keys::resolve(store.as_ref() as &dyn AmbientStore, keys::REQUEST_ID_KEYS)
}

/// Fetches the shared capture slot, creating and registering one when this
/// is the first pipeline layer to run.
pub(crate) fn shared_slot(msg: &impl HttpMessage) -> CaptureSlot {
    if let Some(slot) = msg.extensions().get::<CaptureSlot>() {
        return slot.clone();
    }
    let slot = CaptureSlot::new();
    msg.extensions_mut().insert(slot.clone());
    slot
}

/// Fetches the shared per-request store, creating one when absent.
pub(crate) fn shared_store(msg: &impl HttpMessage) -> Rc<CorrelationStore> {
    if let Some(store) = msg.extensions().get::<Rc<CorrelationStore>>() {
        return store.clone();
    }
    let store = Rc::new(CorrelationStore::new());
    msg.extensions_mut().insert(store.clone());
    store
}
