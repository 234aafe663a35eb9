//! Task timer tracking engine.
//!
//! In-memory record of who is timing which task since when, reconciled
//! against server snapshots.
//! - `store`: the (task, user) keyed map, sole owner of timers
//! - `reconcile`: pure diff of local timers vs. a task snapshot
//! - `hub`: structural-change fan-out
//! - `tracker`: the facade UI and RPC code talk to
//! - `ticker`: per-consumer 1Hz elapsed-seconds polling

pub mod api;
pub mod clock;
pub mod error;
pub mod hub;
pub mod memory;
pub mod reconcile;
pub mod store;
pub mod ticker;
pub mod tracker;
pub mod types;

pub use api::{IdentityProvider, TimerPersistence};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{PersistenceError, SnapshotError, TimerError};
pub use hub::{SubscriberHub, Subscription};
pub use ticker::{ElapsedTicker, DEFAULT_TICK};
pub use tracker::TimerTracker;
pub use types::{format_elapsed, ActiveTimer, RawTimer, TaskId, TaskSnapshot, TimerKey, UserId};
