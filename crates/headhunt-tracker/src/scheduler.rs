//! Refresh scheduler.
//!
//! All triggers (startup, interval, on-demand) funnel through one
//! [`Scheduler`], which allows at most one run in flight. A trigger arriving
//! while a run is in progress joins it and receives the same outcome; it never
//! opens a second render session.
//!
//! Runs execute on their own task and always finish (success or a
//! timeout-bounded failure), even if every caller waiting on them goes away.

use crate::error::TrackerError;
use crate::harvest::Harvester;
use crate::model::Snapshot;
use crate::store::SnapshotStore;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Outcome of one run, shared by every trigger that joined it.
pub type RunOutcome = Result<Arc<Snapshot>, TrackerError>;

/// What caused a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Interval,
    OnDemand,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Startup => "startup",
            Trigger::Interval => "interval",
            Trigger::OnDemand => "on-demand",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
        }
    }
}

struct Inner {
    harvester: Harvester,
    store: Arc<dyn SnapshotStore>,
    /// Present while a run is in flight; joiners clone the receiver.
    in_flight: Mutex<Option<watch::Receiver<Option<RunOutcome>>>>,
    runs_started: AtomicU64,
}

/// Serializes extraction runs and commits their results.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(harvester: Harvester, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                harvester,
                store,
                in_flight: Mutex::new(None),
                runs_started: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        let slot = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Number of runs (render sessions) started so far.
    pub fn runs_started(&self) -> u64 {
        self.inner.runs_started.load(Ordering::SeqCst)
    }

    /// Request a run and wait for its outcome. Joins the in-flight run if there is one.
    pub async fn trigger(&self, trigger: Trigger) -> RunOutcome {
        let mut rx = self.join_or_start(trigger);
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(done) => (*done).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(TrackerError::RunAborted))
    }

    fn join_or_start(&self, trigger: Trigger) -> watch::Receiver<Option<RunOutcome>> {
        let mut slot = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = slot.as_ref() {
            debug!(%trigger, "refresh already running, joining it");
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());
        self.inner.runs_started.fetch_add(1, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let slot = InFlightSlot {
                inner: &inner,
                tx: Some(tx),
            };
            let outcome = inner.run(trigger).await;
            slot.publish(outcome);
        });

        rx
    }

    /// Start the timer: one run immediately, then one per `period`.
    pub fn start(&self, period: Duration) -> SchedulerHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut trigger = Trigger::Startup;

            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = ticker.tick() => {
                        // failures are already logged by the run itself
                        let _ = scheduler.trigger(trigger).await;
                        trigger = Trigger::Interval;
                    }
                }
            }
            debug!("refresh timer stopped");
        });

        info!(interval_secs = period.as_secs(), "refresh timer started");
        SchedulerHandle { shutdown, task }
    }
}

/// Returns the scheduler to idle when a run ends, including by panic.
/// A panicking run drops `tx` unsent, so joiners see [`TrackerError::RunAborted`].
struct InFlightSlot<'a> {
    inner: &'a Inner,
    tx: Option<watch::Sender<Option<RunOutcome>>>,
}

impl InFlightSlot<'_> {
    /// Go idle, then hand the outcome to every joined trigger.
    fn publish(mut self, outcome: RunOutcome) {
        let tx = self.tx.take();
        drop(self);
        if let Some(tx) = tx {
            // no receivers left just means nobody is waiting
            let _ = tx.send(Some(outcome));
        }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Inner {
    async fn run(&self, trigger: Trigger) -> RunOutcome {
        info!(%trigger, "refresh started");
        let started = Instant::now();

        let outcome = match self.harvester.harvest().await {
            Ok(snapshot) => self.commit(snapshot),
            Err(e) => Err(e),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(snapshot) => info!(
                %trigger,
                banners = snapshot.banners.len(),
                elapsed_ms,
                "refresh committed"
            ),
            Err(e) => warn!(%trigger, elapsed_ms, "refresh failed, store left untouched: {e}"),
        }
        outcome
    }

    /// Write a run's snapshot, never letting its capture time go backwards.
    fn commit(&self, mut snapshot: Snapshot) -> RunOutcome {
        if let Ok(current) = self.store.read() {
            if snapshot.captured_at < current.captured_at {
                let floor = current.captured_at;
                snapshot.captured_at = floor;
                for banner in snapshot.banners.values_mut() {
                    banner.captured_at = floor;
                }
            }
        }

        self.store.write(&snapshot)?;
        Ok(Arc::new(snapshot))
    }
}

/// Owns the timer task started by [`Scheduler::start`].
pub struct SchedulerHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the timer. A run already in flight finishes on its own.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            warn!("refresh timer task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::extraction::MarkerExtractor;
    use crate::harvest::HarvestSettings;
    use crate::renderer::testing::{FakeRenderer, SAMPLE_PAGE};
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use tokio::sync::Semaphore;

    fn scheduler(renderer: Arc<FakeRenderer>, store: Arc<dyn SnapshotStore>) -> Scheduler {
        let config = Config::default();
        let harvester = Harvester::new(
            renderer,
            Arc::new(MarkerExtractor::from_config(&config).unwrap()),
            HarvestSettings::from_config(&config),
        );
        Scheduler::new(harvester, store)
    }

    #[tokio::test]
    async fn test_on_demand_run_commits() {
        let renderer = Arc::new(FakeRenderer::new(SAMPLE_PAGE));
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(renderer.clone(), store.clone());

        let snapshot = scheduler.trigger(Trigger::OnDemand).await.unwrap();
        assert_eq!(*store.read().unwrap(), *snapshot);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.runs_started(), 1);
        assert_eq!(renderer.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_leaves_store_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let seeded = scheduler(Arc::new(FakeRenderer::new(SAMPLE_PAGE)), store.clone())
            .trigger(Trigger::Startup)
            .await
            .unwrap();

        let failing = Arc::new(FakeRenderer {
            marker_visible: false,
            ..FakeRenderer::new(SAMPLE_PAGE)
        });
        let scheduler = scheduler(failing.clone(), store.clone());

        let err = scheduler.trigger(Trigger::OnDemand).await.unwrap_err();
        assert!(matches!(err, TrackerError::MarkerNotFound { .. }));
        assert_eq!(*store.read().unwrap(), *seeded);
        assert_eq!(failing.closed(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_trigger_joins_in_flight_run() {
        let gate = Arc::new(Semaphore::new(0));
        let renderer = Arc::new(FakeRenderer {
            gate: Some(gate.clone()),
            ..FakeRenderer::new(SAMPLE_PAGE)
        });
        let scheduler = scheduler(renderer.clone(), Arc::new(MemoryStore::new()));

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.trigger(Trigger::Interval).await }
        });
        while renderer.opened() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.state(), SchedulerState::Running);

        let second = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.trigger(Trigger::OnDemand).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(renderer.opened(), 1);

        gate.add_permits(1);
        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(renderer.opened(), 1);
        assert_eq!(scheduler.runs_started(), 1);

        // once idle, the next trigger starts a fresh session
        scheduler.trigger(Trigger::OnDemand).await.unwrap();
        assert_eq!(renderer.opened(), 2);
    }

    #[tokio::test]
    async fn test_panicking_run_returns_to_idle() {
        let renderer = Arc::new(FakeRenderer::new(SAMPLE_PAGE));
        renderer.panics.store(1, Ordering::SeqCst);
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(renderer.clone(), store.clone());

        let err = scheduler.trigger(Trigger::OnDemand).await.unwrap_err();
        assert_eq!(err, TrackerError::RunAborted);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(store.read().is_err());

        scheduler.trigger(Trigger::OnDemand).await.unwrap();
        assert_eq!(scheduler.runs_started(), 2);
        assert_eq!(renderer.opened(), 1);
        assert!(store.read().is_ok());
    }

    #[tokio::test]
    async fn test_capture_time_never_goes_backwards() {
        let store = Arc::new(MemoryStore::new());
        let future = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
        let mut seeded = (*scheduler(Arc::new(FakeRenderer::new(SAMPLE_PAGE)), store.clone())
            .trigger(Trigger::Startup)
            .await
            .unwrap())
        .clone();
        seeded.captured_at = future;
        store.write(&seeded).unwrap();

        let scheduler = scheduler(Arc::new(FakeRenderer::new(SAMPLE_PAGE)), store.clone());
        let snapshot = scheduler.trigger(Trigger::OnDemand).await.unwrap();
        assert_eq!(snapshot.captured_at, future);
        assert_eq!(snapshot.banners["Basic Headhunting"].captured_at, future);
        assert_eq!(store.read().unwrap().captured_at, future);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_runs_at_startup_and_each_interval() {
        let renderer = Arc::new(FakeRenderer::new(SAMPLE_PAGE));
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(renderer.clone(), store.clone());

        let handle = scheduler.start(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(150)).await;
        handle.stop().await;

        assert_eq!(scheduler.runs_started(), 3);
        assert_eq!(renderer.closed(), 3);
        assert!(store.read().is_ok());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(scheduler.runs_started(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_survives_failed_runs() {
        let renderer = Arc::new(FakeRenderer {
            navigate_error: Some(TrackerError::TransientNetwork("reset".into())),
            ..FakeRenderer::new(SAMPLE_PAGE)
        });
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(renderer.clone(), store.clone());

        let handle = scheduler.start(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(90)).await;
        handle.stop().await;

        assert_eq!(scheduler.runs_started(), 2);
        assert_eq!(store.read().unwrap_err(), TrackerError::StoreUnavailable);
    }
}
