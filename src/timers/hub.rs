use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback>,
}

/// Fan-out of "something structural changed" to zero-argument callbacks.
///
/// Callbacks get no payload; they re-query whatever slice of state they
/// care about. `notify` runs outside the registry lock, so a callback may
/// subscribe, unsubscribe or read tracker state without deadlocking.
#[derive(Default)]
pub struct SubscriberHub {
    registry: Arc<Mutex<Registry>>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` until the returned guard is dropped.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut reg = self.lock();
        let id = reg.next_id;
        reg.next_id += 1;
        reg.callbacks.insert(id, Arc::new(callback));
        log::trace!("[HUB] subscribe #{} ({} total)", id, reg.callbacks.len());

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invokes every registered callback once, synchronously.
    pub fn notify(&self) {
        let callbacks: Vec<Callback> = self.lock().callbacks.values().cloned().collect();
        log::trace!("[HUB] notify -> {} subscriber(s)", callbacks.len());
        for cb in callbacks {
            cb();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().callbacks.len()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SubscriberHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Disposer returned by [`SubscriberHub::subscribe`].
///
/// Unsubscribes on drop; `unsubscribe` does the same explicitly.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut reg = registry.lock().unwrap_or_else(PoisonError::into_inner);
            reg.callbacks.remove(&self.id);
            log::trace!("[HUB] unsubscribe #{} ({} left)", self.id, reg.callbacks.len());
        }
    }
}
