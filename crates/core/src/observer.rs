//! Typed observer registry.
//!
//! Callbacks are kept in registration order behind an [`ObserverId`] so they
//! can be removed individually, and [`ObserverRegistry::len`] makes leaked
//! registrations visible in tests and diagnostics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Callback stored in an [`ObserverRegistry`].
pub type Observer<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle identifying one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Ordered set of callbacks for one event type.
pub struct ObserverRegistry<E> {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Observer<E>)>>,
}

impl<E> ObserverRegistry<E> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Registers a callback and returns its handle.
    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(callback)));
        id
    }

    /// Removes a callback. Returns true if it was registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    /// Delivers `event` to every callback in registration order.
    ///
    /// The callback list is snapshotted first, so callbacks may subscribe or
    /// unsubscribe while being notified. Returns the number of callbacks run.
    pub fn notify(&self, event: &E) -> usize {
        let snapshot: Vec<Observer<E>> = self
            .observers
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in &snapshot {
            callback(event);
        }
        snapshot.len()
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every callback.
    pub fn clear(&self) {
        self.observers.write().clear();
    }
}

impl<E> Default for ObserverRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ObserverRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}
