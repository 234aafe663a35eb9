pub mod config;
pub mod timers;

pub use config::TrackerConfig;
pub use timers::{
    ActiveTimer, ElapsedTicker, TaskId, TaskSnapshot, TimerError, TimerTracker, UserId,
};
