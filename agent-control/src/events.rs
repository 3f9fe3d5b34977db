//! Typed observer registry.
//!
//! Each component owns its own [`EventBus`]; there is no global bus. Emission
//! is synchronous: every listener has returned before `emit` does, so ingestion
//! runs to completion before the next inbound payload is processed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

fn lock<E>(registry: &Mutex<Registry<E>>) -> MutexGuard<'_, Registry<E>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of listeners for events of type `E`.
pub struct EventBus<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register `listener`. It stays attached until the returned handle is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    lock(&registry).listeners.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Deliver `event` to every listener registered at the time of the call.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = lock(&self.registry)
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }

    /// Detach every listener.
    pub fn clear(&self) {
        lock(&self.registry).listeners.clear();
    }
}

/// Handle to a registered listener.
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }

    /// Keep the listener attached for the life of the bus.
    pub fn forget(mut self) {
        self.detach = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(bus: &EventBus<u32>) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sub = bus.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    /// Unsubscribing stops delivery to that listener only.
    #[test]
    fn unsubscribe_stops_only_that_listener() {
        let bus = EventBus::<u32>::new();
        let (first, first_sub) = counter(&bus);
        let (second, _second_sub) = counter(&bus);

        bus.emit(&1);
        first_sub.unsubscribe();
        bus.emit(&2);
        bus.emit(&3);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 3);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn dropping_subscription_detaches() {
        let bus = EventBus::<u32>::new();
        let (count, sub) = counter(&bus);
        drop(sub);
        bus.emit(&1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn forgotten_subscription_stays_attached() {
        let bus = EventBus::<u32>::new();
        let (count, sub) = counter(&bus);
        sub.forget();
        bus.emit(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    /// A handle outliving its bus detaches without panicking.
    #[test]
    fn unsubscribe_after_bus_dropped_is_noop() {
        let bus = EventBus::<u32>::new();
        let (_, sub) = counter(&bus);
        drop(bus);
        sub.unsubscribe();
    }

    #[test]
    fn clear_detaches_every_listener() {
        let bus = EventBus::<u32>::new();
        let (first, first_sub) = counter(&bus);
        let (second, _second_sub) = counter(&bus);

        bus.clear();
        bus.emit(&1);

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 0);
        first_sub.unsubscribe();
    }

    #[test]
    fn listeners_receive_events_in_order() {
        let bus = EventBus::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = bus.subscribe(move |event| {
            sink.lock().expect("lock").push(*event);
        });
        bus.emit(&1);
        bus.emit(&2);
        assert_eq!(*seen.lock().expect("lock"), vec![1, 2]);
    }
}
