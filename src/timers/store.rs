use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::timers::types::{ActiveTimer, TaskId, TimerKey, UserId};

/// In-memory owner of every running timer, keyed by (task, user).
///
/// Pure map operations: the store never notifies anyone. Callers decide
/// when a mutation is structural and fan it out through the hub.
#[derive(Debug, Default)]
pub struct TimerStore {
    timers: BTreeMap<TimerKey, ActiveTimer>,
}

impl TimerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: &TaskId, user_id: &UserId) -> Option<&ActiveTimer> {
        self.timers
            .get(&TimerKey::new(task_id.clone(), user_id.clone()))
    }

    pub fn has(&self, task_id: &TaskId, user_id: &UserId) -> bool {
        self.get(task_id, user_id).is_some()
    }

    /// Inserts `entry` unless its key is already taken.
    ///
    /// Returns the stored entry and whether it was newly inserted. An
    /// existing entry is never overwritten, so its `start_time` survives.
    pub fn set_if_absent(&mut self, entry: ActiveTimer) -> (&ActiveTimer, bool) {
        use std::collections::btree_map::Entry;

        match self.timers.entry(entry.key()) {
            Entry::Occupied(occupied) => {
                log::trace!("[STORE] set_if_absent({}) -> already present", occupied.key());
                (&*occupied.into_mut(), false)
            }
            Entry::Vacant(vacant) => {
                log::debug!("[STORE] inserted {}", vacant.key());
                (&*vacant.insert(entry), true)
            }
        }
    }

    pub fn delete(&mut self, task_id: &TaskId, user_id: &UserId) -> Option<ActiveTimer> {
        let key = TimerKey::new(task_id.clone(), user_id.clone());
        let removed = self.timers.remove(&key);
        if removed.is_some() {
            log::debug!("[STORE] deleted {}", key);
        }
        removed
    }

    /// Every timer of a task, ordered by user id.
    pub fn all_for_task<'a>(
        &'a self,
        task_id: &'a TaskId,
    ) -> impl Iterator<Item = &'a ActiveTimer> + 'a {
        self.timers
            .range((Bound::Included(TimerKey::task_floor(task_id)), Bound::Unbounded))
            .take_while(move |(key, _)| &key.task_id == task_id)
            .map(|(_, timer)| timer)
    }

    /// Composite keys of every timer of a task.
    pub fn keys_for_task(&self, task_id: &TaskId) -> BTreeSet<TimerKey> {
        self.all_for_task(task_id).map(ActiveTimer::key).collect()
    }

    /// Timers of one user across all tasks.
    pub fn all_for_user<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> impl Iterator<Item = &'a ActiveTimer> + 'a {
        self.timers
            .values()
            .filter(move |timer| &timer.user_id == user_id)
    }

    /// Removes every entry, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.timers.len();
        self.timers.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
