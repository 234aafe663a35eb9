use std::future::Future;
use std::sync::Arc;

use crate::timers::error::PersistenceError;
use crate::timers::types::{TaskId, TaskSnapshot, UserId};

/// Supplies the currently authenticated collaborator.
pub trait IdentityProvider: Send + Sync {
    /// `None` when nobody is signed in.
    fn current_user_id(&self) -> Option<UserId>;
}

/// Server-side timer persistence.
///
/// Only `stop_timer` is needed by the engine: starting is optimistic and
/// the caller persists it on its own.
pub trait TimerPersistence: Send + Sync {
    /// Marks the current user's timer on `task_id` as stopped and returns
    /// the updated task, accumulated time included.
    fn stop_timer(
        &self,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<TaskSnapshot, PersistenceError>> + Send;
}

impl<T: IdentityProvider + ?Sized> IdentityProvider for Arc<T> {
    fn current_user_id(&self) -> Option<UserId> {
        (**self).current_user_id()
    }
}

impl<T: TimerPersistence + ?Sized> TimerPersistence for Arc<T> {
    fn stop_timer(
        &self,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<TaskSnapshot, PersistenceError>> + Send {
        (**self).stop_timer(task_id)
    }
}
