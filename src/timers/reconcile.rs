//! Snapshot reconciliation.
//!
//! Pure diff between the local timers of one task and the list of active
//! timers the server reports for it. No locking, no notification: the
//! planner only emits `SyncCommand`s and the tracker applies them.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::timers::store::TimerStore;
use crate::timers::types::{ActiveTimer, RawTimer, TaskId, TimerKey};

/// Minimal mutation derived from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCommand {
    /// Server no longer lists this timer.
    Remove(TimerKey),
    /// Server lists a timer unknown locally; carries the server start time.
    Insert(ActiveTimer),
}

/// Computes the commands that align `store` with `server` for `task_id`.
///
/// Keys present on both sides produce nothing, whatever their start time.
/// Keys in `in_flight_stops` are never re-inserted.
pub fn plan_sync(
    store: &TimerStore,
    task_id: &TaskId,
    task_title: &str,
    server: &[RawTimer],
    in_flight_stops: &HashSet<TimerKey>,
) -> Vec<SyncCommand> {
    let local: BTreeSet<TimerKey> = store.keys_for_task(task_id);
    let remote = resolve_server_timers(task_id, task_title, server);

    let mut cmds = Vec::new();

    for key in &local {
        if !remote.contains_key(key) {
            cmds.push(SyncCommand::Remove(key.clone()));
        }
    }

    for (key, timer) in remote {
        if local.contains(&key) {
            continue;
        }
        if in_flight_stops.contains(&key) {
            log::debug!("[SYNC] {} is being stopped, not re-inserting", key);
            continue;
        }
        cmds.push(SyncCommand::Insert(timer));
    }

    cmds
}

/// Turns raw snapshot entries into timers, skipping what cannot be resolved.
///
/// A duplicated user keeps its first entry.
fn resolve_server_timers(
    task_id: &TaskId,
    task_title: &str,
    server: &[RawTimer],
) -> BTreeMap<TimerKey, ActiveTimer> {
    let mut out = BTreeMap::new();

    for (i, raw) in server.iter().enumerate() {
        let Some(user_ref) = raw.user_id.as_ref() else {
            log::warn!("[SYNC] task {}: entry #{} has no userId, skipped", task_id, i);
            continue;
        };
        let Some(user_id) = user_ref.id() else {
            log::warn!("[SYNC] task {}: entry #{} has an empty userId, skipped", task_id, i);
            continue;
        };
        let Some(start_time) = raw.parsed_start_time() else {
            log::warn!(
                "[SYNC] task {}: entry #{} ({}) has no valid startTime {:?}, skipped",
                task_id,
                i,
                user_id,
                raw.start_time
            );
            continue;
        };

        let timer = ActiveTimer {
            task_id: task_id.clone(),
            user_id,
            start_time,
            task_title: task_title.to_string(),
            user_name: user_ref.name(),
            user_avatar: user_ref.avatar(),
        };

        out.entry(timer.key()).or_insert(timer);
    }

    out
}
