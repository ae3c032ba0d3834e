//! Cycle timing: step checkpoints and the long-cycle alert gate.

use chrono::{DateTime, Utc};
use sentinel_protocol::{CycleReport, TimedStep};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::{offset, Clock};
use crate::sync::lock;

/// Records named checkpoints during one session operation.
pub struct CycleTimer {
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
    last_mark: DateTime<Utc>,
    steps: Vec<TimedStep>,
}

impl CycleTimer {
    pub fn start(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            clock,
            started_at: now,
            last_mark: now,
            steps: Vec::new(),
        }
    }

    /// Closes the step that ended just now.
    pub fn mark(&mut self, name: impl Into<String>) {
        let now = self.clock.now();
        self.steps.push(TimedStep {
            name: name.into(),
            duration_ms: elapsed_ms(self.last_mark, now),
        });
        self.last_mark = now;
    }

    pub fn finish(self) -> CycleReport {
        CycleReport {
            total_ms: elapsed_ms(self.started_at, self.clock.now()),
            steps: self.steps,
        }
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from(to.signed_duration_since(from).num_milliseconds()).unwrap_or(0)
}

/// Decides whether a slow cycle is worth an alert.
pub struct CycleDurationGate {
    max_duration: Duration,
    window: Duration,
    not_before: Mutex<Option<DateTime<Utc>>>,
}

impl CycleDurationGate {
    pub fn new(max_duration: Duration, window: Duration) -> Self {
        Self {
            max_duration,
            window,
            not_before: Mutex::new(None),
        }
    }

    /// Returns `true` when `report` exceeds the limit and no long-cycle alert
    /// went out within the window.
    pub fn check(&self, report: &CycleReport, now: DateTime<Utc>) -> bool {
        let limit_ms = u64::try_from(self.max_duration.as_millis()).unwrap_or(u64::MAX);
        if report.total_ms <= limit_ms {
            return false;
        }

        let mut not_before = lock(&self.not_before);
        if matches!(*not_before, Some(gate) if now < gate) {
            debug!(total_ms = report.total_ms, "Long cycle alert suppressed");
            return false;
        }
        *not_before = Some(offset(now, self.window));
        warn!(
            total_ms = report.total_ms,
            limit_ms, "Cycle exceeded maximum duration"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::epoch;

    fn report(total_ms: u64) -> CycleReport {
        CycleReport {
            total_ms,
            steps: Vec::new(),
        }
    }

    #[test]
    fn timer_measures_each_step_from_the_previous_mark() {
        let clock = Arc::new(ManualClock::new(epoch()));
        let mut timer = CycleTimer::start(clock.clone());

        clock.advance(Duration::from_millis(250));
        timer.mark("reload");
        clock.advance(Duration::from_millis(1000));
        timer.mark("extract");
        clock.advance(Duration::from_millis(5));

        let report = timer.finish();
        assert_eq!(report.total_ms, 1255);
        let steps: Vec<_> = report
            .steps
            .iter()
            .map(|step| (step.name.as_str(), step.duration_ms))
            .collect();
        assert_eq!(steps, vec![("reload", 250), ("extract", 1000)]);
    }

    #[test]
    fn gate_ignores_fast_cycles() {
        let gate = CycleDurationGate::new(Duration::from_secs(15), Duration::from_secs(300));
        assert!(!gate.check(&report(15_000), epoch()));
    }

    #[test]
    fn gate_debounces_slow_cycles() {
        let clock = ManualClock::new(epoch());
        let gate = CycleDurationGate::new(Duration::from_secs(15), Duration::from_secs(300));

        assert!(gate.check(&report(20_000), clock.now()));
        clock.advance(Duration::from_secs(299));
        assert!(!gate.check(&report(20_000), clock.now()));
        clock.advance(Duration::from_secs(1));
        assert!(gate.check(&report(20_000), clock.now()));
    }
}
