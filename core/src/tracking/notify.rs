//! Observer list for state-change notifications.
//!
//! Repositories and the lock service keep an explicit list of
//! callbacks instead of multicast delegates; an observer can be
//! removed with the id returned at registration. Dirty-state observers
//! are invoked only on actual transitions, which the owning component
//! enforces by comparing the aggregate state before and after each
//! mutation.

use std::sync::Mutex;

/// Handle identifying a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// A list of observers receiving `&T` events.
pub struct ChangeNotifier<T> {
    observers: Mutex<Vec<(ObserverId, Callback<T>)>>,
    next_id: Mutex<u64>,
}

impl<T> Default for ChangeNotifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ChangeNotifier<T> {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        }
    }

    /// Register an observer; returns its removal handle.
    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut next = self.next_id.lock().expect("notifier id lock poisoned");
        let id = ObserverId(*next);
        *next += 1;
        self.observers
            .lock()
            .expect("notifier lock poisoned")
            .push((id, Box::new(callback)));
        id
    }

    /// Remove an observer. Returns false if the id was never
    /// registered or already removed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock().expect("notifier lock poisoned");
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    /// Deliver an event to every registered observer, in registration
    /// order.
    pub fn notify(&self, event: &T) {
        let observers = self.observers.lock().expect("notifier lock poisoned");
        for (_, callback) in observers.iter() {
            callback(event);
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.lock().expect("notifier lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> std::fmt::Debug for ChangeNotifier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("observers", &self.len())
            .finish()
    }
}
