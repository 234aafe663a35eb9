use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::timers::api::IdentityProvider;
use crate::timers::clock::{Clock, ManualClock};
use crate::timers::error::TimerError;
use crate::timers::hub::Subscription;
use crate::timers::memory::{InMemoryPersistence, StaticIdentity};
use crate::timers::tracker::TimerTracker;
use crate::timers::types::{RawTimer, TaskId, TaskSnapshot, UserId};

// =========================================================================
// Helpers
// =========================================================================

type TestTracker = TimerTracker<Arc<InMemoryPersistence>, Arc<StaticIdentity>>;

struct Harness {
    tracker: TestTracker,
    backend: Arc<InMemoryPersistence>,
    identity: Arc<StaticIdentity>,
    clock: ManualClock,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

fn harness_with(user: &str, latency: StdDuration) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let clock = ManualClock::new(t0());
    let identity = Arc::new(StaticIdentity::new(user));
    let backend = Arc::new(
        InMemoryPersistence::new(
            identity.clone() as Arc<dyn IdentityProvider>,
            Arc::new(clock.clone()) as Arc<dyn Clock>,
        )
        .with_latency(latency),
    );
    let tracker = TimerTracker::new(
        backend.clone(),
        identity.clone(),
        Arc::new(clock.clone()) as Arc<dyn Clock>,
    );

    Harness {
        tracker,
        backend,
        identity,
        clock,
    }
}

fn harness(user: &str) -> Harness {
    harness_with(user, StdDuration::ZERO)
}

fn task(id: &str) -> TaskId {
    TaskId::new(id)
}

fn user(id: &str) -> UserId {
    UserId::new(id)
}

fn count_notifications(tracker: &TestTracker) -> (Arc<AtomicUsize>, Subscription) {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let sub = tracker.subscribe(move || {
        h.fetch_add(1, Ordering::SeqCst);
    });
    (hits, sub)
}

impl Harness {
    /// Starts locally and server-side, like the UI + start RPC pair.
    fn start(&self, task_id: &str, user_id: &str) {
        let now = self.clock.now();
        self.backend
            .start_timer(&task(task_id), "Design doc", &user(user_id), now);
        self.tracker
            .start_timer(task(task_id), now, "Design doc", user(user_id), None, None);
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn walkthrough_two_users_on_one_task() {
    let h = harness("U1");
    let (hits, _sub) = count_notifications(&h.tracker);

    // 1. U1 starts
    h.start("T1", "U1");
    assert!(h.tracker.is_timer_running(&task("T1")));
    assert_eq!(h.tracker.get_elapsed_time(&task("T1")), 0);

    // 2. five seconds later
    h.clock.advance(Duration::seconds(5));
    assert_eq!(h.tracker.get_elapsed_time(&task("T1")), 5);

    // 3. U2 joins
    h.start("T1", "U2");
    assert_eq!(h.tracker.get_all_active_timers(&task("T1")).len(), 2);

    // 4. U1 stops
    let snapshot = h.tracker.stop_timer(&task("T1")).await.expect("stop succeeds");
    assert_eq!(snapshot.time_spent, Some(5));
    assert!(!h.tracker.is_timer_running(&task("T1")));
    let remaining = h.tracker.get_all_active_timers(&task("T1"));
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].user_id, user("U2"));

    // 5. server says nobody is timing T1 any more
    let before = hits.load(Ordering::SeqCst);
    let changed = h.tracker.sync_timers_from_task(&TaskSnapshot {
        id: task("T1"),
        title: "Design doc".into(),
        active_timers: vec![],
        time_spent: None,
    });
    assert!(changed);
    assert!(h.tracker.get_all_active_timers(&task("T1")).is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), before + 1);
}

#[test]
fn starting_twice_keeps_first_start_time() {
    let h = harness("U1");
    let (hits, _sub) = count_notifications(&h.tracker);

    assert!(h.tracker.start_timer(task("T1"), t0(), "A", user("U1"), None, None));
    let later = t0() + Duration::minutes(3);
    assert!(!h.tracker.start_timer(task("T1"), later, "A", user("U1"), None, None));

    let timers = h.tracker.get_all_active_timers(&task("T1"));
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].start_time, t0());
    assert_eq!(hits.load(Ordering::SeqCst), 1, "no-op start must not notify");
}

#[test]
fn elapsed_time_follows_the_clock() {
    let h = harness("U1");
    h.tracker
        .start_timer(task("T1"), t0(), "A", user("U1"), None, None);

    let mut last = 0;
    for step_ms in [400, 700, 1_000, 2_500, 60_000] {
        h.clock.advance(Duration::milliseconds(step_ms));
        let elapsed = h.tracker.get_elapsed_time(&task("T1"));
        let expected = u64::try_from((h.clock.now() - t0()).num_seconds()).unwrap();
        assert_eq!(elapsed, expected);
        assert!(elapsed >= last);
        last = elapsed;
    }
}

#[test]
fn readings_are_scoped_to_current_user() {
    let h = harness("U1");
    h.tracker
        .start_timer(task("T1"), t0(), "A", user("U2"), None, None);
    h.clock.advance(Duration::seconds(30));

    assert!(!h.tracker.is_timer_running(&task("T1")));
    assert_eq!(h.tracker.get_elapsed_time(&task("T1")), 0);

    h.identity.switch_to("U2");
    assert!(h.tracker.is_timer_running(&task("T1")));
    assert_eq!(h.tracker.get_elapsed_time(&task("T1")), 30);
    assert_eq!(h.tracker.running_task_ids(), vec![task("T1")]);
}

#[test]
fn start_time_in_the_future_reads_as_zero() {
    let h = harness("U1");
    h.tracker.start_timer(
        task("T1"),
        t0() + Duration::seconds(20),
        "A",
        user("U1"),
        None,
        None,
    );
    assert_eq!(h.tracker.get_elapsed_time(&task("T1")), 0);
}

#[tokio::test]
async fn failed_stop_leaves_timer_running() {
    let h = harness("U1");
    h.start("T1", "U1");
    let (hits, _sub) = count_notifications(&h.tracker);

    h.backend.fail_next_stop("network down");
    let err = h.tracker.stop_timer(&task("T1")).await.unwrap_err();

    match err {
        TimerError::Persistence(e) => assert_eq!(e.message, "network down"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(h.tracker.is_timer_running(&task("T1")));
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    // retry goes through
    h.tracker.stop_timer(&task("T1")).await.expect("retry succeeds");
    assert!(!h.tracker.is_timer_running(&task("T1")));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.stop_calls(), 2);
}

#[tokio::test]
async fn stop_without_user_is_rejected_before_any_rpc() {
    let h = harness("U1");
    h.start("T1", "U1");
    h.identity.sign_out();

    let err = h.tracker.stop_timer(&task("T1")).await.unwrap_err();
    assert!(matches!(err, TimerError::NotAuthenticated));
    assert_eq!(h.backend.stop_calls(), 0);
    assert_eq!(h.tracker.get_all_active_timers(&task("T1")).len(), 1);
}

#[test]
fn resync_with_known_timer_is_silent() {
    let h = harness("U1");
    h.start("T1", "U1");
    let (hits, _sub) = count_notifications(&h.tracker);

    let before = h.tracker.current_timer(&task("T1")).unwrap();

    // Server reports a slightly different start: still no mutation.
    let snapshot = TaskSnapshot {
        id: task("T1"),
        title: "Renamed".into(),
        active_timers: vec![RawTimer::new("U1", t0() - Duration::seconds(2))],
        time_spent: None,
    };
    assert!(!h.tracker.sync_timers_from_task(&snapshot));
    assert!(!h.tracker.sync_timers_from_task(&snapshot));

    let after = h.tracker.current_timer(&task("T1")).unwrap();
    assert_eq!(before, after);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn sync_adds_and_removes_with_one_notification() {
    let h = harness("U1");
    h.tracker
        .start_timer(task("T1"), t0(), "A", user("U1"), None, None);
    h.tracker
        .start_timer(task("T1"), t0(), "A", user("U2"), None, None);
    let (hits, _sub) = count_notifications(&h.tracker);

    let payload = r#"{
        "_id": "T1",
        "title": "A",
        "activeTimers": [
            { "userId": "U2", "startTime": "2024-05-01T09:00:00.000Z" },
            { "userId": { "_id": "U3", "name": "Cy", "avatar": "cy.png" },
              "startTime": "2024-05-01T08:30:00Z" },
            { "startTime": "2024-05-01T08:30:00Z" }
        ]
    }"#;
    let snapshot = TaskSnapshot::from_json(payload).unwrap();

    assert!(h.tracker.sync_timers_from_task(&snapshot));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let timers = h.tracker.get_all_active_timers(&task("T1"));
    let users: Vec<_> = timers.iter().map(|t| t.user_id.as_str()).collect();
    assert_eq!(users, vec!["U2", "U3"]);

    let cy = &timers[1];
    assert_eq!(cy.start_time, t0() - Duration::minutes(30));
    assert_eq!(cy.user_name.as_deref(), Some("Cy"));
}

#[test]
fn badly_typed_entries_do_not_block_valid_ones() {
    let h = harness("U1");
    h.tracker
        .start_timer(task("T1"), t0(), "A", user("U9"), None, None);

    let payload = r#"[
        { "_id": "T1", "activeTimers": [
            { "userId": "U1", "startTime": "2024-05-01T09:00:00Z" },
            { "userId": 42, "startTime": "2024-05-01T09:00:00Z" },
            { "userId": "U2", "startTime": 1714554000000 }
        ] },
        { "_id": "T2", "activeTimers": null }
    ]"#;
    let snapshots = TaskSnapshot::list_from_json(payload).unwrap();

    assert!(h.tracker.sync_tasks(&snapshots));

    let users: Vec<_> = h
        .tracker
        .get_all_active_timers(&task("T1"))
        .iter()
        .map(|t| t.user_id.as_str().to_string())
        .collect();
    assert_eq!(users, vec!["U1"]);
    assert!(h.tracker.is_timer_running(&task("T1")));
    assert!(h.tracker.get_all_active_timers(&task("T2")).is_empty());
}

#[test]
fn batch_sync_notifies_once() {
    let h = harness("U1");
    h.tracker
        .start_timer(task("T1"), t0(), "A", user("U1"), None, None);
    let (hits, _sub) = count_notifications(&h.tracker);

    let snapshots = vec![
        TaskSnapshot {
            id: task("T1"),
            title: "A".into(),
            active_timers: vec![],
            time_spent: None,
        },
        TaskSnapshot {
            id: task("T2"),
            title: "B".into(),
            active_timers: vec![RawTimer::new("U1", t0()), RawTimer::new("U2", t0())],
            time_spent: None,
        },
    ];

    assert!(h.tracker.sync_tasks(&snapshots));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!h.tracker.is_timer_running(&task("T1")));
    assert!(h.tracker.is_timer_running(&task("T2")));
    assert_eq!(h.tracker.active_timer_count(), 2);

    assert!(!h.tracker.sync_tasks(&snapshots));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn subscribers_observe_state_after_mutation() {
    let h = harness("U1");
    let seen_running = Arc::new(AtomicBool::new(false));

    let tracker = h.tracker.clone();
    let seen = seen_running.clone();
    let _sub = h.tracker.subscribe(move || {
        seen.store(tracker.is_timer_running(&task("T1")), Ordering::SeqCst);
    });

    h.tracker
        .start_timer(task("T1"), t0(), "A", user("U1"), None, None);
    assert!(seen_running.load(Ordering::SeqCst));

    h.tracker.clear();
    assert!(!seen_running.load(Ordering::SeqCst));
}

#[test]
fn clear_on_empty_store_is_silent() {
    let h = harness("U1");
    let (hits, _sub) = count_notifications(&h.tracker);
    assert_eq!(h.tracker.clear(), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn sync_during_stop_does_not_resurrect_timer() {
    let h = harness_with("U1", StdDuration::from_secs(3));
    h.start("T1", "U1");

    let stopping = {
        let tracker = h.tracker.clone();
        tokio::spawn(async move { tracker.stop_timer(&task("T1")).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(h.backend.stop_calls(), 1);

    // A fresh snapshot already shows the stop...
    h.tracker.sync_timers_from_task(&TaskSnapshot {
        id: task("T1"),
        title: "Design doc".into(),
        active_timers: vec![],
        time_spent: None,
    });
    assert!(!h.tracker.is_timer_running(&task("T1")));

    // ...then a delayed one still lists U1.
    let stale = h.backend.snapshot(&task("T1")).unwrap();
    assert_eq!(stale.active_timers.len(), 1);
    assert!(!h.tracker.sync_timers_from_task(&stale));
    assert!(!h.tracker.is_timer_running(&task("T1")));

    stopping.await.unwrap().expect("stop succeeds");
    assert!(!h.tracker.is_timer_running(&task("T1")));

    // Once settled, the guard is gone and sync is authoritative again.
    assert!(h.tracker.sync_timers_from_task(&stale));
    assert!(h.tracker.is_timer_running(&task("T1")));
}
