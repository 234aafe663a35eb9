use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::timers::error::SnapshotError;

/// Opaque task identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

/// Opaque collaborator identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite key: at most one running timer per (task, user).
///
/// Ordered task-first so every timer of a task sits in one contiguous range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey {
    pub task_id: TaskId,
    pub user_id: UserId,
}

impl TimerKey {
    pub fn new(task_id: TaskId, user_id: UserId) -> Self {
        Self { task_id, user_id }
    }

    /// Smallest key of a task, used as the lower bound of range scans.
    pub(crate) fn task_floor(task_id: &TaskId) -> Self {
        Self {
            task_id: task_id.clone(),
            user_id: UserId(String::new()),
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.task_id, self.user_id)
    }
}

/// Client-side record that a user is currently timing a task.
///
/// `task_title`, `user_name` and `user_avatar` are display metadata only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTimer {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub task_title: String,
    pub user_name: Option<String>,
    pub user_avatar: Option<String>,
}

impl ActiveTimer {
    pub fn key(&self) -> TimerKey {
        TimerKey::new(self.task_id.clone(), self.user_id.clone())
    }

    /// Whole seconds elapsed since `start_time`, clamped at zero.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        let secs = (now - self.start_time).num_milliseconds().div_euclid(1000);
        u64::try_from(secs).unwrap_or(0)
    }
}

// =====================================================================
// Wire types (task snapshot as sent by the backend)
// =====================================================================

/// Authoritative task snapshot, from a REST fetch or a realtime push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    #[serde(rename = "_id")]
    pub id: TaskId,

    #[serde(default, deserialize_with = "or_default")]
    pub title: String,

    /// `null` or a non-array decodes as empty; entries that are not objects
    /// are dropped.
    #[serde(default, deserialize_with = "timer_list")]
    pub active_timers: Vec<RawTimer>,

    /// Accumulated seconds, as reported after a stop.
    #[serde(
        default,
        deserialize_with = "or_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_spent: Option<u64>,
}

impl TaskSnapshot {
    pub fn from_json(payload: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Decodes either a single task object or an array of tasks.
    pub fn list_from_json(payload: &str) -> Result<Vec<Self>, SnapshotError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            Many(Vec<TaskSnapshot>),
            One(TaskSnapshot),
        }

        match serde_json::from_str(payload)? {
            OneOrMany::Many(tasks) => Ok(tasks),
            OneOrMany::One(task) => Ok(vec![task]),
        }
    }
}

/// One entry of `activeTimers`. Both fields are optional on the wire and a
/// value of the wrong type decodes as `None`; entries that cannot be
/// resolved are skipped during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTimer {
    #[serde(default, deserialize_with = "or_default")]
    pub user_id: Option<RawUserRef>,

    #[serde(default, deserialize_with = "or_default")]
    pub start_time: Option<String>,
}

/// `userId` is either a bare id or a populated user object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawUserRef {
    Id(String),
    Profile(UserProfile),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "_id", default, deserialize_with = "or_default")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "or_default")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "or_default")]
    pub avatar: Option<String>,
}

/// Decodes a field as `T`, falling back to `T::default()` when the value
/// has the wrong shape. Malformed JSON is still an error.
fn or_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(de)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

fn timer_list<'de, D>(de: D) -> Result<Vec<RawTimer>, D::Error>
where
    D: Deserializer<'de>,
{
    let serde_json::Value::Array(items) = serde_json::Value::deserialize(de)? else {
        return Ok(Vec::new());
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match RawTimer::deserialize(item) {
            Ok(timer) => Some(timer),
            Err(e) => {
                log::warn!("[SYNC] dropping undecodable activeTimers entry: {}", e);
                None
            }
        })
        .collect())
}

impl RawUserRef {
    /// Returns the user id if present and non-empty.
    pub fn id(&self) -> Option<UserId> {
        let id = match self {
            RawUserRef::Id(id) => Some(id.as_str()),
            RawUserRef::Profile(p) => p.id.as_deref(),
        }?;

        let id = id.trim();
        (!id.is_empty()).then(|| UserId::new(id))
    }

    pub fn name(&self) -> Option<String> {
        match self {
            RawUserRef::Profile(p) => p.name.clone(),
            RawUserRef::Id(_) => None,
        }
    }

    pub fn avatar(&self) -> Option<String> {
        match self {
            RawUserRef::Profile(p) => p.avatar.clone(),
            RawUserRef::Id(_) => None,
        }
    }
}

impl RawTimer {
    pub fn new(user_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            user_id: Some(RawUserRef::Id(user_id.into())),
            start_time: Some(start_time.to_rfc3339()),
        }
    }

    /// Parses `startTime` as an RFC 3339 / ISO-8601 instant.
    pub fn parsed_start_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.start_time.as_deref()?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Renders seconds as `HH:MM:SS` (hours are not wrapped).
pub fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
