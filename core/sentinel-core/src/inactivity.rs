//! Repeating alert when no successful cycle lands within the period.
//!
//! Each firing also asks the session driver for a resource reload.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, warn};

use sentinel_protocol::Alert;

use crate::driver::SessionDriver;
use crate::notifier::Notifier;
use crate::sync::lock;
use crate::timers::{TimerId, TimerQueue};

#[derive(Debug, Default)]
struct WatchdogState {
    generation: u64,
    pending: Option<TimerId>,
}

pub struct InactivityWatchdog {
    timers: Arc<TimerQueue>,
    notifier: Arc<dyn Notifier>,
    driver: Arc<dyn SessionDriver>,
    period: Duration,
    state: Mutex<WatchdogState>,
    weak_self: Weak<InactivityWatchdog>,
}

impl InactivityWatchdog {
    pub fn new(
        timers: Arc<TimerQueue>,
        notifier: Arc<dyn Notifier>,
        driver: Arc<dyn SessionDriver>,
        period: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            timers,
            notifier,
            driver,
            period,
            state: Mutex::new(WatchdogState::default()),
            weak_self: weak_self.clone(),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Restarts the countdown from now, replacing any pending firing.
    pub fn rearm(&self) {
        let mut state = lock(&self.state);
        self.arm(&mut state);
    }

    pub fn disable(&self) {
        let mut state = lock(&self.state);
        if let Some(id) = state.pending.take() {
            self.timers.cancel(id);
            debug!("Inactivity watchdog disabled");
        }
        state.generation += 1;
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    fn arm(&self, state: &mut WatchdogState) {
        if let Some(id) = state.pending.take() {
            self.timers.cancel(id);
        }
        state.generation += 1;
        let generation = state.generation;
        let watchdog = self.weak_self.clone();
        state.pending = Some(self.timers.schedule_in(
            self.period,
            "inactivity",
            Box::new(move || {
                if let Some(watchdog) = watchdog.upgrade() {
                    watchdog.fire(generation);
                }
            }),
        ));
    }

    fn fire(&self, generation: u64) {
        {
            let mut state = lock(&self.state);
            if state.generation != generation {
                return;
            }
            self.arm(&mut state);
        }

        let after_secs = self.period.as_secs();
        warn!(after_secs, "No successful cycle within inactivity period");
        self.notifier.notify(&Alert::Inactivity { after_secs });
        if let Err(err) = self.driver.request_resource_reload() {
            warn!(error = %err, "Inactivity resource reload request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{epoch, DriverRequest, RecordingDriver, RecordingNotifier};

    fn fixture() -> (
        Arc<ManualClock>,
        Arc<TimerQueue>,
        Arc<RecordingNotifier>,
        Arc<InactivityWatchdog>,
    ) {
        let (clock, timers, notifier, _driver, watchdog) =
            fixture_with(Arc::new(RecordingDriver::default()));
        (clock, timers, notifier, watchdog)
    }

    fn fixture_with(
        driver: Arc<RecordingDriver>,
    ) -> (
        Arc<ManualClock>,
        Arc<TimerQueue>,
        Arc<RecordingNotifier>,
        Arc<RecordingDriver>,
        Arc<InactivityWatchdog>,
    ) {
        let clock = Arc::new(ManualClock::new(epoch()));
        let timers = Arc::new(TimerQueue::new(clock.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let watchdog = InactivityWatchdog::new(
            Arc::clone(&timers),
            notifier.clone(),
            driver.clone(),
            Duration::from_secs(180),
        );
        (clock, timers, notifier, driver, watchdog)
    }

    #[test]
    fn fires_every_period_until_rearmed() {
        let (clock, timers, notifier, watchdog) = fixture();
        watchdog.rearm();

        for _ in 0..3 {
            clock.advance(Duration::from_secs(180));
            timers.fire_due();
        }
        assert_eq!(notifier.inactivity(), 3);
        assert_eq!(
            notifier.alerts()[0],
            Alert::Inactivity { after_secs: 180 }
        );
        assert!(watchdog.is_armed());
    }

    #[test]
    fn rearm_pushes_the_deadline_back() {
        let (clock, timers, notifier, watchdog) = fixture();
        watchdog.rearm();

        clock.advance(Duration::from_secs(170));
        timers.fire_due();
        watchdog.rearm();

        clock.advance(Duration::from_secs(170));
        timers.fire_due();
        assert_eq!(notifier.inactivity(), 0);

        clock.advance(Duration::from_secs(10));
        timers.fire_due();
        assert_eq!(notifier.inactivity(), 1);
        assert_eq!(timers.pending(), 1);
    }

    #[test]
    fn disable_stops_alerts() {
        let (clock, timers, notifier, watchdog) = fixture();
        watchdog.rearm();
        watchdog.disable();

        clock.advance(Duration::from_secs(1000));
        timers.fire_due();
        assert_eq!(notifier.inactivity(), 0);
        assert!(!watchdog.is_armed());
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn stale_firing_after_disable_is_ignored() {
        let (_clock, timers, notifier, watchdog) = fixture();
        watchdog.rearm();
        let stale = lock(&watchdog.state).generation;
        watchdog.disable();

        watchdog.fire(stale);
        assert_eq!(notifier.inactivity(), 0);
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn each_firing_requests_one_resource_reload() {
        let (clock, timers, notifier, driver, watchdog) =
            fixture_with(Arc::new(RecordingDriver::default()));
        watchdog.rearm();

        for _ in 0..2 {
            clock.advance(Duration::from_secs(180));
            timers.fire_due();
        }
        assert_eq!(notifier.inactivity(), 2);
        assert_eq!(
            driver.requests(),
            vec![DriverRequest::ResourceReload, DriverRequest::ResourceReload]
        );
    }

    #[test]
    fn failed_reload_request_keeps_the_watchdog_running() {
        let (clock, timers, notifier, driver, watchdog) =
            fixture_with(Arc::new(RecordingDriver::failing()));
        watchdog.rearm();

        clock.advance(Duration::from_secs(180));
        timers.fire_due();
        assert_eq!(notifier.inactivity(), 1);
        assert_eq!(driver.requests(), vec![DriverRequest::ResourceReload]);
        assert!(watchdog.is_armed());
    }
}
