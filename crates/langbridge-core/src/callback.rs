use crate::envelope::Envelope;
use crate::state::ConnectionState;
use std::sync::{Arc, Mutex, Weak};

/// Notified on every state transition. Invoked on the runner task, so
/// implementations must not block or call back into blocking bridge
/// operations such as `send` or `stop`.
pub trait StateChangeHandler: Send + Sync {
    fn on_state_change(&self, previous: ConnectionState, next: ConnectionState);
}

/// Receives every application-level envelope. Same runner-task caveats as
/// `StateChangeHandler`.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, envelope: Envelope);
}

/// Holder for a swappable, non-owning callback reference.
///
/// The slot keeps a `Weak` so the bridge never extends the callback target's
/// lifetime. Swapping happens under the slot's own lock; a dispatch that has
/// already upgraded its reference completes against the handler it captured.
pub struct CallbackSlot<T: ?Sized> {
    slot: Mutex<Option<Weak<T>>>,
}

impl<T: ?Sized> CallbackSlot<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Replace the stored handler; `None` detaches.
    pub fn set(&self, handler: Option<&Arc<T>>) {
        let mut slot = self.slot.lock().expect("callback slot poisoned");
        *slot = handler.map(Arc::downgrade);
    }

    /// Upgrade the stored handler for one dispatch. Returns `None` when the
    /// slot is empty or the target has been dropped.
    pub fn get(&self) -> Option<Arc<T>> {
        let slot = self.slot.lock().expect("callback slot poisoned");
        slot.as_ref().and_then(Weak::upgrade)
    }
}

impl<T: ?Sized> Default for CallbackSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl MessageHandler for Counter {
        fn on_message(&self, _envelope: Envelope) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn slot_does_not_keep_the_handler_alive() {
        let slot: CallbackSlot<dyn MessageHandler> = CallbackSlot::new();
        let handler: Arc<dyn MessageHandler> = Arc::new(Counter(AtomicUsize::new(0)));
        slot.set(Some(&handler));
        assert!(slot.get().is_some());

        drop(handler);
        assert!(slot.get().is_none());
    }

    #[test]
    fn detaching_clears_the_slot() {
        let slot: CallbackSlot<dyn MessageHandler> = CallbackSlot::new();
        let handler: Arc<dyn MessageHandler> = Arc::new(Counter(AtomicUsize::new(0)));
        slot.set(Some(&handler));
        slot.set(None);
        assert!(slot.get().is_none());
    }

    #[test]
    fn dispatch_in_flight_survives_a_swap() {
        let slot: CallbackSlot<dyn MessageHandler> = CallbackSlot::new();
        let first = Arc::new(Counter(AtomicUsize::new(0)));
        let as_dyn: Arc<dyn MessageHandler> = first.clone();
        slot.set(Some(&as_dyn));

        // Capture the handler the way a dispatch does, then swap underneath it.
        let captured = slot.get().unwrap();
        slot.set(None);
        captured.on_message(Envelope::data(vec![]));
        assert_eq!(first.0.load(Ordering::SeqCst), 1);
    }
}
