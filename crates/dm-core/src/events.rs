use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// What changed in the message store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// The messages or last-seen marker of one conversation changed.
    /// A new message index `Arc` is in place if its contents changed.
    Conversation(String),
    /// A conversation was dropped entirely.
    ConversationRemoved(String),
    /// Every conversation was dropped (logout / reset).
    Cleared,
}

type Listener = Arc<dyn Fn(&StoreChange) + Send + Sync>;

/// Listener registry behind `MessageStore::subscribe`.
#[derive(Default)]
pub struct Observers {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            observers: Arc::downgrade(self),
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener. The registry lock is released first, so listeners
    /// may subscribe, unsubscribe or read the store.
    pub fn notify(&self, change: &StoreChange) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            listener(change);
        }
    }

    fn remove(&self, id: u64) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    observers: Weak<Observers>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    /// Keep the listener registered for the lifetime of the store.
    pub fn detach(mut self) {
        self.observers = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.remove(self.id);
        }
    }
}
