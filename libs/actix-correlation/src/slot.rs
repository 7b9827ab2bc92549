//! Per-request capture slot shared between the chain wrapper, the commit
//! hook, and the outcome layer.

use std::cell::RefCell;
use std::rc::Rc;

use correlation_core::CorrelationSnapshot;

/// Progress of the wrapped downstream invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainState {
    #[default]
    NotInvoked,
    Invoked,
    /// Terminal regardless of how the invocation ended.
    Captured,
}

/// Shared slot holding the chain state and the captured snapshot.
///
/// The first capture wins: later offers (typically the commit-hook backup)
/// are discarded instead of overwriting, so a later degraded capture can
/// never replace an earlier good one.
#[derive(Debug, Clone, Default)]
pub struct CaptureSlot {
    inner: Rc<RefCell<SlotInner>>,
}

#[derive(Debug, Default)]
struct SlotInner {
    state: ChainState,
    snapshot: Option<CorrelationSnapshot>,
}

impl CaptureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ChainState {
        self.inner.borrow().state
    }

    pub fn mark_invoked(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state == ChainState::NotInvoked {
            inner.state = ChainState::Invoked;
        }
    }

    /// Stores `snapshot` unless a capture already happened. Returns whether
    /// the offer was accepted.
    pub fn offer(&self, snapshot: CorrelationSnapshot) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.state == ChainState::Captured {
            return false;
        }
        inner.snapshot = Some(snapshot);
        inner.state = ChainState::Captured;
        true
    }

    pub fn is_captured(&self) -> bool {
        self.state() == ChainState::Captured
    }

    pub fn snapshot(&self) -> Option<CorrelationSnapshot> {
        self.inner.borrow().snapshot.clone()
    }

    /// Consumes the snapshot for the restore phase; the terminal state is
    /// kept so late triggers still see the capture as done.
    pub fn take(&self) -> Option<CorrelationSnapshot> {
        self.inner.borrow_mut().snapshot.take()
    }
}
