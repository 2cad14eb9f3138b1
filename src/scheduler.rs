//! Periodic auto-sync and auto-create drivers.
//!
//! Each [`Scheduler`] owns at most one background loop. Ticks never overlap:
//! a tick that comes due while the previous one is still running is skipped,
//! not queued. Errors (and panics) from a tick are recorded in the status and
//! the loop carries on.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{BridgeError, Result};

/// Which periodic driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    AutoSync,
    AutoCreate,
}

enum_display_fromstr!(SchedulerKind, BridgeError::Other, {
    AutoSync => "auto-sync" | "sync" | "autosync",
    AutoCreate => "auto-create" | "create" | "autocreate",
});

/// Start or stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerAction {
    Start,
    Stop,
    Status,
}

enum_display_fromstr!(SchedulerAction, BridgeError::Other, {
    Start => "start",
    Stop => "stop",
    Status => "status",
});

/// One tick of work; resolves to a one-line summary.
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub kind: SchedulerKind,
    pub running: bool,
    /// Seconds between ticks while running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<Timestamp>,
    pub run_count: u64,
    /// Ticks skipped because the previous one was still running
    pub skipped_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SchedulerStatus {
    fn idle(kind: SchedulerKind) -> Self {
        Self {
            kind,
            running: false,
            interval: None,
            last_run: None,
            next_run: None,
            run_count: 0,
            skipped_count: 0,
            last_run_summary: None,
            last_error: None,
        }
    }
}

struct Shared {
    status: Mutex<SchedulerStatus>,
    busy: AtomicBool,
    /// Bumped on every start/stop; stale loops stop touching `next_run`
    generation: AtomicU64,
}

struct Poller {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    kind: SchedulerKind,
    job: Job,
    shared: Arc<Shared>,
    poller: Mutex<Option<Poller>>,
}

impl Scheduler {
    pub fn new(kind: SchedulerKind, job: Job) -> Self {
        Self {
            kind,
            job,
            shared: Arc::new(Shared {
                status: Mutex::new(SchedulerStatus::idle(kind)),
                busy: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
            poller: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    /// Start ticking every `interval`. Calling this while running replaces
    /// the interval; the old loop stops before its next tick.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) -> Result<SchedulerStatus> {
        if interval.is_zero() {
            return Err(BridgeError::Config(
                "scheduler interval must be at least 1 second".to_string(),
            ));
        }

        let mut poller = self.poller.lock();
        if let Some(old) = poller.take() {
            // In-flight tick of the old loop finishes; busy flag keeps the
            // new loop from overlapping it
            let _ = old.stop_tx.send(());
            drop(old.task);
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let shared = Arc::clone(&self.shared);
        let job = Arc::clone(&self.job);
        let kind = self.kind;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    due = ticker.tick() => {
                        run_tick(&shared, &job, kind).await;
                        // Ticks that came due while this one ran are dropped
                        let overrun = Instant::now().saturating_duration_since(due);
                        let missed = (overrun.as_nanos() / interval.as_nanos()) as u64;
                        if missed > 0 {
                            ticker.reset();
                            shared.status.lock().skipped_count += missed;
                        }
                        if shared.generation.load(Ordering::SeqCst) == generation {
                            shared.status.lock().next_run = after(interval);
                        }
                    }
                }
            }
            tracing::debug!(scheduler = %kind, "scheduler loop stopped");
        });
        *poller = Some(Poller { stop_tx, task });

        let mut status = self.shared.status.lock();
        status.running = true;
        status.interval = Some(interval.as_secs());
        status.next_run = after(interval);
        tracing::info!(scheduler = %self.kind, interval_secs = interval.as_secs(), "scheduler started");
        Ok(status.clone())
    }

    /// Stop ticking. A tick already running completes; no new tick starts.
    pub fn stop(&self) -> SchedulerStatus {
        if let Some(old) = self.poller.lock().take() {
            let _ = old.stop_tx.send(());
            tracing::info!(scheduler = %self.kind, "scheduler stopped");
        }
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        let mut status = self.shared.status.lock();
        status.running = false;
        status.interval = None;
        status.next_run = None;
        status.clone()
    }

    pub fn status(&self) -> SchedulerStatus {
        self.shared.status.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.poller.lock().is_some()
    }

    /// Run one tick now, unless one is already running. Returns whether the
    /// tick ran.
    pub async fn run_now(&self) -> bool {
        run_tick(&self.shared, &self.job, self.kind).await
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(old) = self.poller.get_mut().take() {
            let _ = old.stop_tx.send(());
        }
    }
}

fn after(interval: Duration) -> Option<Timestamp> {
    let interval = SignedDuration::try_from(interval).ok()?;
    Timestamp::now().checked_add(interval).ok()
}

async fn run_tick(shared: &Shared, job: &Job, kind: SchedulerKind) -> bool {
    if shared.busy.swap(true, Ordering::SeqCst) {
        shared.status.lock().skipped_count += 1;
        tracing::debug!(scheduler = %kind, "previous tick still running, skipping");
        return false;
    }

    let started = Timestamp::now();
    let result = AssertUnwindSafe(job()).catch_unwind().await;
    shared.busy.store(false, Ordering::SeqCst);

    let mut status = shared.status.lock();
    status.last_run = Some(started);
    status.run_count += 1;
    match result {
        Ok(Ok(summary)) => {
            tracing::info!(scheduler = %kind, summary = %summary, "tick finished");
            status.last_run_summary = Some(summary);
            status.last_error = None;
        }
        Ok(Err(err)) => {
            tracing::warn!(scheduler = %kind, error = %err, "tick failed");
            status.last_error = Some(err.to_string());
        }
        Err(_) => {
            tracing::warn!(scheduler = %kind, "tick panicked");
            status.last_error = Some("tick panicked".to_string());
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_job(calls: Arc<AtomicUsize>, work: Duration, fail: bool) -> Job {
        Arc::new(move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if !work.is_zero() {
                    tokio::time::sleep(work).await;
                }
                if fail {
                    Err(BridgeError::Transient {
                        platform: crate::types::Platform::Tracker,
                        message: "HTTP 503".to_string(),
                    })
                } else {
                    Ok(format!("pass {n}"))
                }
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(
            SchedulerKind::AutoSync,
            counting_job(Arc::clone(&calls), Duration::ZERO, false),
        );
        let status = scheduler.start(Duration::from_secs(60)).unwrap();
        assert!(status.running);
        assert_eq!(status.interval, Some(60));
        assert!(status.next_run.is_some());

        tokio::time::sleep(Duration::from_secs(125)).await;
        let status = scheduler.status();
        assert_eq!(status.run_count, 2);
        assert_eq!(status.last_run_summary.as_deref(), Some("pass 2"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(
            SchedulerKind::AutoCreate,
            counting_job(Arc::clone(&calls), Duration::ZERO, false),
        );
        scheduler.start(Duration::from_secs(60)).unwrap();
        scheduler.start(Duration::from_secs(60)).unwrap();
        scheduler.start(Duration::from_secs(30)).unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.status().interval, Some(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_next_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(
            SchedulerKind::AutoSync,
            counting_job(Arc::clone(&calls), Duration::ZERO, false),
        );
        scheduler.start(Duration::from_secs(10)).unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;

        let status = scheduler.stop();
        assert!(!status.running);
        assert_eq!(status.next_run, None);
        assert!(!scheduler.is_running());

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_recorded_not_fatal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(
            SchedulerKind::AutoSync,
            counting_job(Arc::clone(&calls), Duration::ZERO, true),
        );
        scheduler.start(Duration::from_secs(10)).unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;

        let status = scheduler.status();
        assert_eq!(status.run_count, 2);
        assert!(status.last_error.unwrap().contains("HTTP 503"));
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_tick_is_contained() {
        let job: Job = Arc::new(|| {
            async {
                let explode = true;
                if explode {
                    panic!("boom");
                }
                Ok::<_, BridgeError>(String::new())
            }
            .boxed()
        });
        let scheduler = Scheduler::new(SchedulerKind::AutoSync, job);
        scheduler.start(Duration::from_secs(10)).unwrap();
        tokio::time::sleep(Duration::from_secs(21)).await;

        let status = scheduler.status();
        assert_eq!(status.run_count, 2);
        assert_eq!(status.last_error.as_deref(), Some("tick panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_tick_is_skipped_not_queued() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(
            SchedulerKind::AutoSync,
            counting_job(Arc::clone(&calls), Duration::from_secs(25), false),
        );
        scheduler.start(Duration::from_secs(10)).unwrap();

        // First tick runs from t=10 to t=35
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(!scheduler.run_now().await);
        assert_eq!(scheduler.status().skipped_count, 1);

        // Ticks due at 20 and 30 are dropped; the cadence restarts at 35
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.status().skipped_count, 3);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let scheduler = Scheduler::new(
            SchedulerKind::AutoSync,
            counting_job(Arc::new(AtomicUsize::new(0)), Duration::ZERO, false),
        );
        assert!(scheduler.start(Duration::ZERO).is_err());
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(
            "auto-sync".parse::<SchedulerKind>().unwrap(),
            SchedulerKind::AutoSync
        );
        assert_eq!(
            "create".parse::<SchedulerKind>().unwrap(),
            SchedulerKind::AutoCreate
        );
        assert_eq!(SchedulerKind::AutoCreate.to_string(), "auto-create");
    }
}
