//! Per-consumer elapsed-time ticker.
//!
//! Structural changes (start/stop/sync) reach the ticker through the hub;
//! the per-second refresh stays local to the one consumer displaying the
//! clock. Nothing else in the process is woken up once a second.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::timers::api::{IdentityProvider, TimerPersistence};
use crate::timers::hub::Subscription;
use crate::timers::tracker::TimerTracker;
use crate::timers::types::TaskId;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Live elapsed-seconds reading of the current user's timer on one task.
///
/// Dropping the ticker stops the polling task and unsubscribes it.
#[derive(Debug)]
pub struct ElapsedTicker {
    task_id: TaskId,
    rx: watch::Receiver<u64>,
    handle: JoinHandle<()>,
    _subscription: Subscription,
}

impl ElapsedTicker {
    /// Starts ticking for `task_id`. Must be called inside a tokio runtime.
    pub fn spawn<P, I>(tracker: &TimerTracker<P, I>, task_id: TaskId, period: Duration) -> Self
    where
        P: TimerPersistence + 'static,
        I: IdentityProvider + 'static,
    {
        // Subscribe before the first read so no change can slip between.
        let wake = Arc::new(Notify::new());
        let subscription = {
            let wake = wake.clone();
            tracker.subscribe(move || wake.notify_one())
        };

        let initial = tracker.get_elapsed_time(&task_id);
        let phase = started_at(tracker, &task_id);
        let (tx, rx) = watch::channel(initial);

        log::trace!(
            "[TICKER] {}: mounted (running={}, elapsed={})",
            task_id,
            phase.is_some(),
            initial
        );

        let handle = tokio::spawn(run(
            tracker.clone(),
            task_id.clone(),
            period,
            wake,
            tx,
            phase,
        ));

        Self {
            task_id,
            rx,
            handle,
            _subscription: subscription,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Latest published elapsed seconds.
    pub fn elapsed(&self) -> u64 {
        *self.rx.borrow()
    }

    /// Waits for the next published value. `None` once the ticker is gone.
    pub async fn changed(&mut self) -> Option<u64> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Receiver for binding the reading elsewhere (e.g. a view model).
    pub fn receiver(&self) -> watch::Receiver<u64> {
        self.rx.clone()
    }

    pub fn shutdown(self) {
        // Drop does the work.
    }
}

impl Drop for ElapsedTicker {
    fn drop(&mut self) {
        self.handle.abort();
        log::trace!("[TICKER] {}: unmounted", self.task_id);
    }
}

async fn run<P, I>(
    tracker: TimerTracker<P, I>,
    task_id: TaskId,
    period: Duration,
    wake: Arc<Notify>,
    tx: watch::Sender<u64>,
    mut phase: Option<DateTime<Utc>>,
) where
    P: TimerPersistence,
    I: IdentityProvider,
{
    let mut ticks = every(period);

    loop {
        tokio::select! {
            _ = wake.notified() => {
                // Several changes may be merged into one wake-up, so compare
                // start times rather than running flags.
                let current = started_at(&tracker, &task_id);
                match (phase, current) {
                    (_, Some(start)) if phase != current => {
                        log::debug!("[TICKER] {}: timer (re)started at {}, ticking", task_id, start);
                        ticks = every(period);
                    }
                    (Some(_), None) => {
                        log::debug!("[TICKER] {}: timer gone, idle", task_id);
                    }
                    _ => {}
                }
                phase = current;
                publish(&tx, tracker.get_elapsed_time(&task_id));
            }
            _ = ticks.tick(), if phase.is_some() => {
                publish(&tx, tracker.get_elapsed_time(&task_id));
            }
        }
    }
}

fn started_at<P, I>(tracker: &TimerTracker<P, I>, task_id: &TaskId) -> Option<DateTime<Utc>>
where
    P: TimerPersistence,
    I: IdentityProvider,
{
    tracker.current_timer(task_id).map(|t| t.start_time)
}

/// First tick one period from now, not immediately.
fn every(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn publish(tx: &watch::Sender<u64>, elapsed: u64) {
    tx.send_if_modified(|current| {
        if *current == elapsed {
            return false;
        }
        *current = elapsed;
        true
    });
}

impl<P, I> TimerTracker<P, I>
where
    P: TimerPersistence + 'static,
    I: IdentityProvider + 'static,
{
    /// Convenience for [`ElapsedTicker::spawn`].
    pub fn elapsed_ticker(&self, task_id: TaskId, period: Duration) -> ElapsedTicker {
        ElapsedTicker::spawn(self, task_id, period)
    }
}
