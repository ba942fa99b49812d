//! Disposal capability
//!
//! Long-lived resources (sessions, kernels, pool entries, managers)
//! implement [`Disposable`]. Disposal is deterministic and idempotent:
//! the first call tears the object down, later calls are no-ops.

use crate::signal::Signal;
use std::sync::atomic::{AtomicBool, Ordering};

/// Object with an explicit, idempotent teardown
pub trait Disposable: Send + Sync {
    /// Whether the object has been disposed
    fn is_disposed(&self) -> bool;

    /// Dispose the object
    fn dispose(&self);
}

/// Disposable object that announces its own disposal
pub trait ObservableDisposable: Disposable {
    /// Signal emitted once when the object is disposed
    fn disposed(&self) -> &Signal<Self, ()>;
}

/// Idempotent disposal flag
#[derive(Debug, Default)]
pub struct DisposalState {
    disposed: AtomicBool,
}

impl DisposalState {
    /// Create a live (not disposed) state
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark as disposed
    ///
    /// Returns `true` only for the call that performed the transition.
    #[inline]
    pub fn begin(&self) -> bool {
        self.disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether disposal has started
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_transitions_once() {
        let state = DisposalState::new();
        assert!(!state.is_disposed());
        assert!(state.begin());
        assert!(!state.begin());
        assert!(state.is_disposed());
    }
}
