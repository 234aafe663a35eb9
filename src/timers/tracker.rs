//! Timer tracker facade.
//!
//! The only entry point UI code and the RPC layer use. It owns the store,
//! the hub and the collaborators, and enforces "mutate, release, notify":
//! every structural change is visible before any subscriber runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::timers::api::{IdentityProvider, TimerPersistence};
use crate::timers::clock::{Clock, SystemClock};
use crate::timers::error::TimerError;
use crate::timers::hub::{SubscriberHub, Subscription};
use crate::timers::reconcile::{plan_sync, SyncCommand};
use crate::timers::store::TimerStore;
use crate::timers::types::{ActiveTimer, TaskId, TaskSnapshot, TimerKey, UserId};

struct Inner<P, I> {
    store: Mutex<TimerStore>,
    hub: SubscriberHub,
    /// Keys with a stop RPC in flight, with the number of pending calls.
    stopping: Mutex<HashMap<TimerKey, usize>>,
    persistence: P,
    identity: I,
    clock: Arc<dyn Clock>,
}

/// Session-scoped timer engine. Cheap to clone; clones share state.
pub struct TimerTracker<P, I> {
    inner: Arc<Inner<P, I>>,
}

impl<P, I> Clone for TimerTracker<P, I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P, I> TimerTracker<P, I>
where
    P: TimerPersistence,
    I: IdentityProvider,
{
    pub fn new(persistence: P, identity: I, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(TimerStore::new()),
                hub: SubscriberHub::new(),
                stopping: Mutex::new(HashMap::new()),
                persistence,
                identity,
                clock,
            }),
        }
    }

    pub fn with_system_clock(persistence: P, identity: I) -> Self {
        Self::new(persistence, identity, Arc::new(SystemClock))
    }

    // ================================
    // Mutations
    // ================================

    /// Optimistically records a running timer.
    ///
    /// Idempotent per (task, user): a second start keeps the first entry
    /// and its start time. Returns whether an entry was inserted.
    pub fn start_timer(
        &self,
        task_id: TaskId,
        start_time: DateTime<Utc>,
        task_title: impl Into<String>,
        user_id: UserId,
        user_name: Option<String>,
        user_avatar: Option<String>,
    ) -> bool {
        let entry = ActiveTimer {
            task_id,
            user_id,
            start_time,
            task_title: task_title.into(),
            user_name,
            user_avatar,
        };

        let inserted = {
            let mut store = self.store();
            store.set_if_absent(entry).1
        };

        if inserted {
            self.inner.hub.notify();
        }
        inserted
    }

    /// Stops the current user's timer on `task_id`.
    ///
    /// The local entry is only removed once the persistence call succeeds.
    /// On failure the error is returned as-is and nothing changes locally,
    /// so the caller may retry.
    pub async fn stop_timer(&self, task_id: &TaskId) -> Result<TaskSnapshot, TimerError> {
        let user_id = self
            .inner
            .identity
            .current_user_id()
            .ok_or(TimerError::NotAuthenticated)?;
        let key = TimerKey::new(task_id.clone(), user_id);

        log::debug!("[TRACKER] stopping {}", key);
        let result = {
            let _guard = StopGuard::enter(&self.inner.stopping, key.clone());
            self.inner.persistence.stop_timer(task_id).await
        };

        match result {
            Ok(snapshot) => {
                let removed = self.store().delete(&key.task_id, &key.user_id).is_some();
                if removed {
                    self.inner.hub.notify();
                }
                log::info!("[TRACKER] stopped {} (timeSpent={:?})", key, snapshot.time_spent);
                Ok(snapshot)
            }
            Err(err) => {
                log::warn!("[TRACKER] stop {} failed: {}", key, err);
                Err(err.into())
            }
        }
    }

    /// Reconciles one task against a server snapshot.
    ///
    /// Notifies once if anything was inserted or removed, never otherwise.
    pub fn sync_timers_from_task(&self, snapshot: &TaskSnapshot) -> bool {
        let changed = {
            let mut store = self.store();
            self.apply_snapshot(&mut store, snapshot)
        };

        if changed > 0 {
            self.inner.hub.notify();
        }
        changed > 0
    }

    /// Reconciles a batch of tasks, e.g. after a list refetch.
    /// Tasks absent from the batch are left alone. Notifies at most once.
    pub fn sync_tasks(&self, snapshots: &[TaskSnapshot]) -> bool {
        let changed: usize = {
            let mut store = self.store();
            snapshots
                .iter()
                .map(|s| self.apply_snapshot(&mut store, s))
                .sum()
        };

        if changed > 0 {
            self.inner.hub.notify();
        }
        changed > 0
    }

    /// Drops every timer, e.g. on sign-out. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = self.store().clear();
        if removed > 0 {
            log::debug!("[TRACKER] cleared {} timer(s)", removed);
            self.inner.hub.notify();
        }
        removed
    }

    // ================================
    // Queries
    // ================================

    /// Whether the current user is timing `task_id`.
    pub fn is_timer_running(&self, task_id: &TaskId) -> bool {
        self.current_timer(task_id).is_some()
    }

    /// Whole seconds the current user has been timing `task_id`, 0 if not.
    pub fn get_elapsed_time(&self, task_id: &TaskId) -> u64 {
        self.current_timer(task_id)
            .map(|t| t.elapsed_secs(self.inner.clock.now()))
            .unwrap_or(0)
    }

    /// Every running timer on `task_id`, whoever started it.
    pub fn get_all_active_timers(&self, task_id: &TaskId) -> Vec<ActiveTimer> {
        self.store().all_for_task(task_id).cloned().collect()
    }

    pub fn current_timer(&self, task_id: &TaskId) -> Option<ActiveTimer> {
        let user_id = self.inner.identity.current_user_id()?;
        self.store().get(task_id, &user_id).cloned()
    }

    /// Tasks the current user is timing.
    pub fn running_task_ids(&self) -> Vec<TaskId> {
        let Some(user_id) = self.inner.identity.current_user_id() else {
            return Vec::new();
        };
        self.store()
            .all_for_user(&user_id)
            .map(|t| t.task_id.clone())
            .collect()
    }

    pub fn active_timer_count(&self) -> usize {
        self.store().len()
    }

    // ================================
    // Wiring
    // ================================

    /// Registers a callback fired after each structural change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.hub.subscribe(callback)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.hub.subscriber_count()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn persistence(&self) -> &P {
        &self.inner.persistence
    }

    pub fn identity(&self) -> &I {
        &self.inner.identity
    }

    fn store(&self) -> MutexGuard<'_, TimerStore> {
        self.inner.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies one snapshot under an already-held store lock.
    /// Returns the number of inserts and removals.
    fn apply_snapshot(&self, store: &mut TimerStore, snapshot: &TaskSnapshot) -> usize {
        let stopping: HashSet<TimerKey> = self
            .inner
            .stopping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        let cmds = plan_sync(
            store,
            &snapshot.id,
            &snapshot.title,
            &snapshot.active_timers,
            &stopping,
        );

        let changed = cmds.len();
        for cmd in cmds {
            match cmd {
                SyncCommand::Remove(key) => {
                    store.delete(&key.task_id, &key.user_id);
                }
                SyncCommand::Insert(timer) => {
                    store.set_if_absent(timer);
                }
            }
        }

        if changed > 0 {
            log::debug!("[SYNC] task {}: {} change(s) applied", snapshot.id, changed);
        } else {
            log::trace!("[SYNC] task {}: already in sync", snapshot.id);
        }
        changed
    }
}

/// Marks a key as "stop in flight" for as long as it lives, including when
/// the surrounding future is dropped mid-await.
struct StopGuard<'a> {
    stopping: &'a Mutex<HashMap<TimerKey, usize>>,
    key: TimerKey,
}

impl<'a> StopGuard<'a> {
    fn enter(stopping: &'a Mutex<HashMap<TimerKey, usize>>, key: TimerKey) -> Self {
        *stopping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert(0) += 1;
        Self { stopping, key }
    }
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        let mut stopping = self.stopping.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(n) = stopping.get_mut(&self.key) {
            *n -= 1;
            if *n == 0 {
                stopping.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests;
