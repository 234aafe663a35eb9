use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, ValueEnum};

use task_timer_sync::config::TrackerConfig;
use task_timer_sync::timers::memory::{InMemoryPersistence, StaticIdentity};
use task_timer_sync::timers::{
    format_elapsed, Clock, IdentityProvider, ManualClock, SystemClock, TaskId, TaskSnapshot,
    TimerTracker, UserId,
};

type CliTracker = TimerTracker<Arc<InMemoryPersistence>, Arc<StaticIdentity>>;

#[derive(ValueEnum, Clone, Debug)]
enum Mode {
    /// Walk through start / tick / stop / sync with two users.
    Demo,
    /// Reconcile snapshot JSON and print who is timing what.
    Inspect,
    /// Follow the ticking elapsed time of one task.
    Watch,
}

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[arg(long, value_enum, default_value_t = Mode::Demo)]
    mode: Mode,

    /// JSON config file (tickIntervalMs, userId).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Signed-in user id; overrides the config.
    #[arg(long)]
    user: Option<String>,

    /// Task snapshot JSON file (one task object or an array).
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Task to watch.
    #[arg(long)]
    task: Option<String>,

    /// How long to watch.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };

    println!("[MAIN] Mode: {:?}", args.mode);

    match args.mode {
        Mode::Demo => run_demo().await,
        Mode::Inspect => run_inspect(&args, &config),
        Mode::Watch => run_watch(&args, &config).await,
    }
}

fn build_tracker(user: Option<&str>, clock: Arc<dyn Clock>) -> CliTracker {
    let identity = Arc::new(match user {
        Some(u) => StaticIdentity::new(u),
        None => StaticIdentity::signed_out(),
    });
    let backend = Arc::new(InMemoryPersistence::new(
        identity.clone() as Arc<dyn IdentityProvider>,
        clock.clone(),
    ));
    TimerTracker::new(backend, identity, clock)
}

fn load_snapshots(path: Option<&PathBuf>) -> Result<Vec<TaskSnapshot>> {
    let Some(path) = path else {
        bail!("--snapshot is required in this mode");
    };
    let payload = std::fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    Ok(TaskSnapshot::list_from_json(&payload)?)
}

async fn run_demo() -> Result<()> {
    let clock = ManualClock::new(Utc::now());
    let tracker = build_tracker(Some("U1"), Arc::new(clock.clone()));
    let backend = tracker.persistence().clone();
    let t1 = TaskId::new("T1");

    let _log_changes = {
        let view = tracker.clone();
        let t1 = t1.clone();
        tracker.subscribe(move || {
            println!(
                "[HUB] structural change: {} timer(s) on {}",
                view.get_all_active_timers(&t1).len(),
                t1
            );
        })
    };

    println!("[DEMO] U1 starts timing \"Design doc\"");
    let start = clock.now();
    backend.start_timer(&t1, "Design doc", &UserId::new("U1"), start);
    tracker.start_timer(t1.clone(), start, "Design doc", UserId::new("U1"), Some("Ana".into()), None);
    println!(
        "[DEMO] running={} elapsed={}",
        tracker.is_timer_running(&t1),
        tracker.get_elapsed_time(&t1)
    );

    clock.advance(ChronoDuration::seconds(5));
    println!("[DEMO] +5s elapsed={}", tracker.get_elapsed_time(&t1));

    println!("[DEMO] U2 joins");
    let start = clock.now();
    backend.start_timer(&t1, "Design doc", &UserId::new("U2"), start);
    tracker.start_timer(t1.clone(), start, "Design doc", UserId::new("U2"), Some("Bo".into()), None);
    println!("[DEMO] active timers on T1: {}", tracker.get_all_active_timers(&t1).len());

    println!("[DEMO] U1 stops (first attempt fails)");
    backend.fail_next_stop("service unavailable");
    if let Err(e) = tracker.stop_timer(&t1).await {
        println!("[DEMO] stop failed: {} (still running={})", e, tracker.is_timer_running(&t1));
    }
    let snapshot = tracker.stop_timer(&t1).await?;
    println!(
        "[DEMO] stopped, timeSpent={}s running={}",
        snapshot.time_spent.unwrap_or(0),
        tracker.is_timer_running(&t1)
    );

    println!("[DEMO] server reports nobody timing T1");
    let changed = tracker.sync_timers_from_task(&TaskSnapshot {
        id: t1.clone(),
        title: "Design doc".into(),
        active_timers: vec![],
        time_spent: snapshot.time_spent,
    });
    println!(
        "[DEMO] changed={} remaining={}",
        changed,
        tracker.get_all_active_timers(&t1).len()
    );

    Ok(())
}

fn run_inspect(args: &Args, config: &TrackerConfig) -> Result<()> {
    let snapshots = load_snapshots(args.snapshot.as_ref())?;
    let user = args.user.as_deref().or(config.user_id.as_deref());
    let tracker = build_tracker(user, Arc::new(SystemClock));

    tracker.sync_tasks(&snapshots);

    println!("-----------------------------------");
    for snap in &snapshots {
        let timers = tracker.get_all_active_timers(&snap.id);
        println!("{} \"{}\": {} timing", snap.id, snap.title, timers.len());
        let now = tracker.now();
        for t in timers {
            println!(
                "    {:<12} {:<16} {}",
                t.user_id,
                t.user_name.as_deref().unwrap_or("-"),
                format_elapsed(t.elapsed_secs(now))
            );
        }
    }
    println!("-----------------------------------");

    let mine = tracker.running_task_ids();
    if !mine.is_empty() {
        let list: Vec<_> = mine.iter().map(TaskId::to_string).collect();
        println!("You are timing: {}", list.join(", "));
    }

    Ok(())
}

async fn run_watch(args: &Args, config: &TrackerConfig) -> Result<()> {
    let snapshots = load_snapshots(args.snapshot.as_ref())?;
    let Some(task) = args.task.as_deref().map(TaskId::new) else {
        bail!("--task is required in watch mode");
    };
    let user = args.user.as_deref().or(config.user_id.as_deref());
    if user.is_none() {
        bail!("watch mode needs a user (--user or userId in config)");
    }

    let tracker = build_tracker(user, Arc::new(SystemClock));
    tracker.sync_tasks(&snapshots);

    if !tracker.is_timer_running(&task) {
        println!("[WATCH] no running timer on {} for this user", task);
        return Ok(());
    }

    let mut ticker = tracker.elapsed_ticker(task.clone(), config.tick_interval());
    println!("[WATCH] {} {}", task, format_elapsed(ticker.elapsed()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.seconds);
    while let Ok(Some(secs)) = tokio::time::timeout_at(deadline, ticker.changed()).await {
        println!("[WATCH] {} {}", task, format_elapsed(secs));
    }

    ticker.shutdown();
    Ok(())
}
