use thiserror::Error;

/// Rejection reported by the timer-persistence service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PersistenceError {
    pub message: String,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced by tracker operations. None of them are fatal; the
/// local timer state is left untouched whenever one is returned.
#[derive(Debug, Error)]
pub enum TimerError {
    /// The identity provider has no current user.
    #[error("no authenticated user")]
    NotAuthenticated,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// A snapshot payload that could not be decoded at all.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid task snapshot: {0}")]
    Decode(#[from] serde_json::Error),
}
