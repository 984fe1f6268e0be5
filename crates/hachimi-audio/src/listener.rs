//! Listener registry for playback events.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hachimi_core::PlayEvent;
use parking_lot::RwLock;

/// Observer of [`PlayEvent`]s.
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &PlayEvent);
}

impl<F> Listener for F
where
    F: Fn(&PlayEvent) + Send + Sync,
{
    fn on_event(&self, event: &PlayEvent) {
        self(event);
    }
}

/// Handle returned by [`ListenerRegistry::add`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Set of registered listeners.
///
/// Dispatch iterates over a snapshot, so a listener may add or remove
/// listeners (itself included) while handling an event.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn Listener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn dispatch(&self, event: &PlayEvent) {
        let snapshot: Vec<Arc<dyn Listener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener.on_event(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispatch_reaches_every_listener() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            registry.add(Arc::new(move |_: &PlayEvent| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        registry.dispatch(&PlayEvent::Play);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remove() {
        let registry = ListenerRegistry::new();
        let id = registry.add(Arc::new(|_: &PlayEvent| {}));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_listener_can_remove_itself() {
        let registry = Arc::new(ListenerRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let own_id = Arc::new(Mutex::new(None));

        let listener = {
            let registry = Arc::clone(&registry);
            let seen = Arc::clone(&seen);
            let own_id = Arc::clone(&own_id);
            move |event: &PlayEvent| {
                seen.lock().push(event.name());
                if let Some(id) = *own_id.lock() {
                    registry.remove(id);
                }
            }
        };
        *own_id.lock() = Some(registry.add(Arc::new(listener)));

        registry.dispatch(&PlayEvent::Play);
        registry.dispatch(&PlayEvent::Pause);
        assert_eq!(*seen.lock(), vec!["play"]);
        assert!(registry.is_empty());
    }
}
