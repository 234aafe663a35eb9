//! In-memory stand-ins for the backend collaborators.
//!
//! `InMemoryPersistence` keeps the authoritative per-task timer lists the
//! way the real service would and hands out snapshots of them. Used by the
//! CLI demo and by tests; it can inject failures and latency.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::timers::api::{IdentityProvider, TimerPersistence};
use crate::timers::clock::Clock;
use crate::timers::error::PersistenceError;
use crate::timers::types::{RawTimer, TaskId, TaskSnapshot, UserId};

/// Identity provider with a switchable signed-in user.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    user: Mutex<Option<UserId>>,
}

impl StaticIdentity {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: Mutex::new(Some(UserId::new(user))),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn switch_to(&self, user: impl Into<String>) {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner) = Some(UserId::new(user));
    }

    pub fn sign_out(&self) {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        self.user.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Debug, Default)]
struct ServerTask {
    title: String,
    timers: BTreeMap<UserId, DateTime<Utc>>,
    time_spent: u64,
}

impl ServerTask {
    fn snapshot(&self, id: &TaskId) -> TaskSnapshot {
        TaskSnapshot {
            id: id.clone(),
            title: self.title.clone(),
            active_timers: self
                .timers
                .iter()
                .map(|(user, start)| RawTimer::new(user.as_str(), *start))
                .collect(),
            time_spent: Some(self.time_spent),
        }
    }
}

/// Simulated timer-persistence backend.
pub struct InMemoryPersistence {
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    tasks: Mutex<HashMap<TaskId, ServerTask>>,
    failures: Mutex<VecDeque<PersistenceError>>,
    latency: Duration,
    stop_calls: AtomicUsize,
}

impl InMemoryPersistence {
    pub fn new(identity: Arc<dyn IdentityProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            identity,
            clock,
            tasks: Mutex::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            latency: Duration::ZERO,
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// Every `stop_timer` call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Records a running timer server-side, as the start RPC would.
    /// Returns the updated snapshot.
    pub fn start_timer(
        &self,
        task_id: &TaskId,
        title: &str,
        user_id: &UserId,
        start_time: DateTime<Utc>,
    ) -> TaskSnapshot {
        let mut tasks = self.tasks();
        let task = tasks.entry(task_id.clone()).or_default();
        if task.title.is_empty() {
            task.title = title.to_string();
        }
        task.timers.entry(user_id.clone()).or_insert(start_time);
        task.snapshot(task_id)
    }

    /// Drops a timer server-side without going through the client, e.g. a
    /// stop issued from another device or a server-side expiry.
    pub fn expire_timer(&self, task_id: &TaskId, user_id: &UserId) -> Option<TaskSnapshot> {
        let mut tasks = self.tasks();
        let task = tasks.get_mut(task_id)?;
        task.timers.remove(user_id);
        Some(task.snapshot(task_id))
    }

    pub fn snapshot(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        self.tasks().get(task_id).map(|t| t.snapshot(task_id))
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks();
        let mut out: Vec<_> = tasks.iter().map(|(id, t)| t.snapshot(id)).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Makes the next `stop_timer` call reject with `message`.
    pub fn fail_next_stop(&self, message: impl Into<String>) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(PersistenceError::new(message));
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, ServerTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_now(&self, task_id: &TaskId) -> Result<TaskSnapshot, PersistenceError> {
        if let Some(err) = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            log::debug!("[MEMORY] injected stop failure for {}: {}", task_id, err);
            return Err(err);
        }

        let user_id = self
            .identity
            .current_user_id()
            .ok_or_else(|| PersistenceError::new("unauthorized"))?;

        let now = self.clock.now();
        let mut tasks = self.tasks();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| PersistenceError::new(format!("task {} not found", task_id)))?;

        let start = task.timers.remove(&user_id).ok_or_else(|| {
            PersistenceError::new(format!("no running timer for {} on {}", user_id, task_id))
        })?;

        let spent = u64::try_from((now - start).num_seconds()).unwrap_or(0);
        task.time_spent += spent;
        log::debug!("[MEMORY] stopped {}/{} after {}s", task_id, user_id, spent);

        Ok(task.snapshot(task_id))
    }
}

impl TimerPersistence for InMemoryPersistence {
    async fn stop_timer(&self, task_id: &TaskId) -> Result<TaskSnapshot, PersistenceError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.stop_now(task_id)
    }
}
