//! Publish/subscribe channels
//!
//! Provides [`Signal`], a typed observer list parameterized by the sender
//! type and the payload type. Every long-lived object in the client layer
//! exposes its change notifications as signals.

use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle identifying one connected slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

type Slot<S, T> = Arc<dyn Fn(&S, &T) + Send + Sync>;

/// Typed observer list
///
/// Slots receive a reference to the emitting object and the payload.
/// Emission works on a snapshot of the connected slots, so a slot may
/// connect, disconnect or emit re-entrantly without deadlocking.
pub struct Signal<S: ?Sized, T> {
    slots: Mutex<Vec<(SlotId, Slot<S, T>)>>,
    next_id: AtomicU64,
    _sender: PhantomData<fn(&S)>,
}

impl<S: ?Sized, T> Signal<S, T> {
    /// Create a signal with no connected slots
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            _sender: PhantomData,
        }
    }

    /// Connect a slot
    ///
    /// Returns the id needed to disconnect it again.
    pub fn connect<F>(&self, slot: F) -> SlotId
    where
        F: Fn(&S, &T) + Send + Sync + 'static,
    {
        let id = SlotId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots.lock().push((id, Arc::new(slot)));
        id
    }

    /// Disconnect a slot, returning whether it was connected
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        slots.len() != before
    }

    /// Disconnect every slot
    #[inline]
    pub fn disconnect_all(&self) {
        self.slots.lock().clear();
    }

    /// Invoke every connected slot in connection order
    pub fn emit(&self, sender: &S, args: &T) {
        let snapshot: Vec<Slot<S, T>> = self
            .slots
            .lock()
            .iter()
            .map(|(_, slot)| Arc::clone(slot))
            .collect();

        for slot in snapshot {
            slot(sender, args);
        }
    }

    /// Number of connected slots
    #[inline]
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }
}

impl<S: ?Sized, T> Default for Signal<S, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized, T> fmt::Debug for Signal<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("slots", &self.slot_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Emitter {
        changed: Signal<Emitter, u32>,
        label: &'static str,
    }

    #[test]
    fn emit_reaches_slots_in_order() {
        let emitter = Emitter {
            changed: Signal::new(),
            label: "source",
        };
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        emitter.changed.connect(move |sender, value| {
            first.lock().push(format!("a:{}:{}", sender.label, value));
        });
        let second = Arc::clone(&seen);
        emitter.changed.connect(move |_, value| {
            second.lock().push(format!("b:{value}"));
        });

        emitter.changed.emit(&emitter, &7);

        assert_eq!(*seen.lock(), vec!["a:source:7", "b:7"]);
    }

    #[test]
    fn disconnect_stops_delivery() {
        let signal: Signal<(), ()> = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = signal.connect(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.emit(&(), &());
        assert!(signal.disconnect(id));
        assert!(!signal.disconnect(id));
        signal.emit(&(), &());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(signal.slot_count(), 0);
    }

    #[test]
    fn slots_may_disconnect_during_emit() {
        let signal: Arc<Signal<(), ()>> = Arc::new(Signal::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner_signal = Arc::clone(&signal);
        let counter = Arc::clone(&count);
        signal.connect(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner_signal.disconnect_all();
        });

        signal.emit(&(), &());
        signal.emit(&(), &());

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
