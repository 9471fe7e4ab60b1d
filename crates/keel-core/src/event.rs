//! Listener-registration event bus.
//!
//! Delivery is synchronous and in registration order within one `emit`.
//! Listeners are snapshotted before they run, so a listener may subscribe
//! further listeners (they see the next emit) without deadlocking.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Multi-listener event emitter.
pub struct EventBus<E> {
    listeners: RwLock<Vec<Listener<E>>>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener. Listeners are never removed.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Deliver `event` to every listener, in registration order.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self.listeners.read().clone();
        for listener in snapshot {
            listener(event);
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Adapt the bus into a channel.
    ///
    /// Events emitted after this call are forwarded to the returned receiver.
    /// Forwarding silently stops once the receiver is dropped.
    pub fn channel(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |event: &E| {
            let _ = tx.send(event.clone());
        });
        rx
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_delivers_in_registration_order() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            bus.subscribe(move |n: &u32| seen.lock().push(format!("{tag}{n}")));
        }

        bus.emit(&1);
        bus.emit(&2);

        assert_eq!(*seen.lock(), vec!["a1", "b1", "c1", "a2", "b2", "c2"]);
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let bus: Arc<EventBus<u32>> = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.subscribe(move |_| inner.subscribe(|_| {}));

        bus.emit(&1);
        assert_eq!(bus.listener_count(), 2);
    }

    #[tokio::test]
    async fn test_channel_forwards_events() {
        let bus: EventBus<&'static str> = EventBus::new();
        let mut rx = bus.channel();

        bus.emit(&"open");
        bus.emit(&"filled");

        assert_eq!(rx.recv().await, Some("open"));
        assert_eq!(rx.recv().await, Some("filled"));
    }
}
