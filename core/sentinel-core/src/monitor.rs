//! Wires every component into one running monitor.

use sentinel_protocol::Alert;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::{ProducersConfig, SentinelConfig};
use crate::cycle::CycleDurationGate;
use crate::db::SqliteStore;
use crate::driver::{QueuedDriver, SessionDriver};
use crate::engine::{DecisionEngine, EngineParts};
use crate::error::Result;
use crate::inactivity::InactivityWatchdog;
use crate::incident::IncidentTracker;
use crate::ladder::RecoveryLadder;
use crate::notifier::Notifier;
use crate::producers::{Producer, ProducerOp};
use crate::retention::RetentionSweep;
use crate::scheduler::JobScheduler;
use crate::session::SessionMachine;
use crate::store::RecordStore;
use crate::sync::lock;
use crate::timers::TimerQueue;

/// Collaborators supplied by the host.
pub struct MonitorParts {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn RecordStore>,
    pub notifier: Arc<dyn Notifier>,
    pub driver: Arc<dyn SessionDriver>,
}

impl MonitorParts {
    /// System clock and the SQLite store from `config.store`.
    pub fn production(
        config: &SentinelConfig,
        driver: Arc<dyn SessionDriver>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = SqliteStore::new(config.store.resolve_path()?, Arc::clone(&clock))?;
        Ok(Self {
            clock,
            store: Arc::new(store),
            notifier,
            driver,
        })
    }
}

/// The four periodic session operations, scheduled at the intervals from
/// `[producers]`.
pub struct SessionProducers {
    pub lean_poll: ProducerOp,
    pub full_reload: ProducerOp,
    pub dialog_poll: ProducerOp,
    pub snapshot: ProducerOp,
}

pub struct Monitor {
    account: String,
    tick: Duration,
    intervals: ProducersConfig,
    timers: Arc<TimerQueue>,
    scheduler: Arc<JobScheduler>,
    notifier: Arc<dyn Notifier>,
    ladder: Arc<RecoveryLadder>,
    watchdog: Arc<InactivityWatchdog>,
    engine: Arc<DecisionEngine>,
    session: Arc<SessionMachine>,
    producers: Mutex<Vec<Arc<Producer>>>,
    started: AtomicBool,
}

impl Monitor {
    pub fn new(config: &SentinelConfig, parts: MonitorParts) -> Result<Self> {
        config.validate()?;

        let timers = Arc::new(TimerQueue::new(Arc::clone(&parts.clock)));
        let scheduler = Arc::new(JobScheduler::start()?);
        let driver: Arc<dyn SessionDriver> =
            Arc::new(QueuedDriver::new(parts.driver, Arc::clone(&scheduler)));

        let ladder = RecoveryLadder::new(
            Arc::clone(&timers),
            Arc::clone(&driver),
            Arc::clone(&parts.notifier),
            config.ladder.stages(),
        );
        let watchdog = InactivityWatchdog::new(
            Arc::clone(&timers),
            Arc::clone(&parts.notifier),
            driver,
            Duration::from_secs(config.watchdog.inactivity_secs),
        );
        let incidents = IncidentTracker::new(
            Arc::clone(&parts.clock),
            Arc::clone(&parts.notifier),
            Arc::clone(&ladder),
            config.incidents.windows(),
        );
        let engine = Arc::new(DecisionEngine::new(EngineParts {
            clock: Arc::clone(&parts.clock),
            store: Arc::clone(&parts.store),
            notifier: Arc::clone(&parts.notifier),
            incidents,
            watchdog: Arc::clone(&watchdog),
            cycle_gate: CycleDurationGate::new(
                Duration::from_millis(config.cycle.max_duration_ms),
                Duration::from_secs(config.cycle.long_cycle_window_secs),
            ),
            labels: config.labels(),
        }));
        let session = Arc::new(SessionMachine::new(engine.clone()));

        let sweep = Arc::new(RetentionSweep::new(
            parts.store,
            parts.clock,
            config.collection_names(),
            config.retention.max_age(),
        ));
        let retention = Producer::new(
            "retention_sweep",
            Duration::from_secs(config.retention.sweep_interval_secs),
            Arc::new(move || {
                sweep.sweep();
            }),
            Arc::clone(&timers),
            Arc::clone(&scheduler),
        );

        Ok(Self {
            account: config.account.clone(),
            tick: Duration::from_millis(config.timers.tick_ms),
            intervals: config.producers.clone(),
            timers,
            scheduler,
            notifier: parts.notifier,
            ladder,
            watchdog,
            engine,
            session,
            producers: Mutex::new(vec![retention]),
            started: AtomicBool::new(false),
        })
    }

    /// Registers a session producer. Producers added after `start` begin
    /// immediately.
    pub fn add_producer(&self, name: &str, interval: Duration, operation: ProducerOp) {
        let producer = Producer::new(
            name,
            interval,
            operation,
            Arc::clone(&self.timers),
            Arc::clone(&self.scheduler),
        );
        if self.started.load(Ordering::SeqCst) {
            producer.start();
        }
        lock(&self.producers).push(producer);
    }

    pub fn add_session_producers(&self, producers: SessionProducers) {
        let intervals = self.intervals.clone();
        self.add_producer("lean_poll", intervals.lean_poll(), producers.lean_poll);
        self.add_producer("full_reload", intervals.full_reload(), producers.full_reload);
        self.add_producer("dialog_poll", intervals.dialog_poll(), producers.dialog_poll);
        self.add_producer("snapshot", intervals.snapshot(), producers.snapshot);
    }

    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.engine.init();
        let producers = lock(&self.producers).clone();
        for producer in &producers {
            producer.start();
        }
        info!(account = %self.account, producers = producers.len(), "Monitor started");
        self.notifier.notify(&Alert::AppLaunched);
    }

    /// Drives timers from a background thread at the configured tick.
    pub fn spawn_timer_pump(&self) -> Result<JoinHandle<()>> {
        self.timers.spawn_pump(self.tick)
    }

    /// Stops producers and timers, then drains the scheduler.
    pub fn shutdown(&self) {
        for producer in lock(&self.producers).iter() {
            producer.stop();
        }
        self.ladder.cancel();
        self.watchdog.disable();
        self.timers.stop();
        self.scheduler.shutdown();
        info!(account = %self.account, "Monitor stopped");
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn engine(&self) -> Arc<DecisionEngine> {
        Arc::clone(&self.engine)
    }

    pub fn session(&self) -> Arc<SessionMachine> {
        Arc::clone(&self.session)
    }

    pub fn scheduler(&self) -> Arc<JobScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn timers(&self) -> Arc<TimerQueue> {
        Arc::clone(&self.timers)
    }

    pub fn ladder(&self) -> Arc<RecoveryLadder> {
        Arc::clone(&self.ladder)
    }

    pub fn watchdog(&self) -> Arc<InactivityWatchdog> {
        Arc::clone(&self.watchdog)
    }

    pub fn producer_names(&self) -> Vec<String> {
        lock(&self.producers)
            .iter()
            .map(|producer| producer.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::SentinelError;
    use crate::store::MemoryStore;
    use crate::testing::{epoch, RecordingDriver, RecordingNotifier};

    fn parts(notifier: Arc<RecordingNotifier>) -> MonitorParts {
        MonitorParts {
            clock: Arc::new(ManualClock::new(epoch())),
            store: Arc::new(MemoryStore::default()),
            notifier,
            driver: Arc::new(RecordingDriver::default()),
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = SentinelConfig::default();
        config.ladder.stages.clear();
        let result = Monitor::new(&config, parts(Arc::new(RecordingNotifier::default())));
        assert!(matches!(result, Err(SentinelError::ConfigInvalid(_))));
    }

    #[test]
    fn start_announces_launch_once_and_arms_timers() {
        let notifier = Arc::new(RecordingNotifier::default());
        let monitor =
            Monitor::new(&SentinelConfig::default(), parts(notifier.clone())).expect("monitor");
        monitor.add_producer("lean_poll", Duration::from_secs(5), Arc::new(|| {}));

        monitor.start();
        monitor.start();

        assert_eq!(notifier.alerts(), vec![Alert::AppLaunched]);
        assert!(monitor.watchdog().is_armed());
        assert_eq!(
            monitor.producer_names(),
            vec!["retention_sweep".to_string(), "lean_poll".to_string()]
        );
        // Watchdog plus one first tick per producer.
        assert_eq!(monitor.timers().pending(), 3);
        monitor.shutdown();
        assert_eq!(monitor.timers().pending(), 0);
    }

    #[test]
    fn session_producers_tick_at_configured_intervals() {
        use std::sync::atomic::AtomicUsize;

        let mut config = SentinelConfig::default();
        config.producers.lean_poll_secs = 2;
        config.producers.full_reload_secs = 7;
        let clock = Arc::new(ManualClock::new(epoch()));
        let monitor = Monitor::new(
            &config,
            MonitorParts {
                clock: clock.clone(),
                store: Arc::new(MemoryStore::default()),
                notifier: Arc::new(RecordingNotifier::default()),
                driver: Arc::new(RecordingDriver::default()),
            },
        )
        .expect("monitor");

        let counter = |runs: &Arc<AtomicUsize>| -> ProducerOp {
            let runs = Arc::clone(runs);
            Arc::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };
        let lean = Arc::new(AtomicUsize::new(0));
        let full = Arc::new(AtomicUsize::new(0));
        let dialog = Arc::new(AtomicUsize::new(0));
        let snapshot = Arc::new(AtomicUsize::new(0));
        monitor.add_session_producers(SessionProducers {
            lean_poll: counter(&lean),
            full_reload: counter(&full),
            dialog_poll: counter(&dialog),
            snapshot: counter(&snapshot),
        });
        monitor.start();

        let step = |secs: u64| {
            clock.advance(Duration::from_secs(secs));
            monitor.timers().fire_due();
            monitor
                .scheduler()
                .submit("barrier", || ())
                .wait()
                .expect("barrier");
        };
        // Each step lets the previous runs re-arm before time moves on.
        step(0);
        for _ in 0..7 {
            step(1);
        }

        assert_eq!(lean.load(Ordering::SeqCst), 4);
        assert_eq!(full.load(Ordering::SeqCst), 2);
        assert_eq!(dialog.load(Ordering::SeqCst), 1);
        assert_eq!(snapshot.load(Ordering::SeqCst), 1);
        assert_eq!(
            monitor.producer_names(),
            vec![
                "retention_sweep".to_string(),
                "lean_poll".to_string(),
                "full_reload".to_string(),
                "dialog_poll".to_string(),
                "snapshot".to_string(),
            ]
        );
        monitor.shutdown();
    }
}
