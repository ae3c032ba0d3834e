//! Escalating recovery ladder.
//!
//! While a classified incident is open the ladder fires corrective actions at
//! fixed offsets from the moment the run started. Offsets are absolute, not
//! chained, so a slow stage never delays the next one. The final stage
//! re-arms the whole ladder from stage one and bumps the iteration counter;
//! the ladder keeps trying until the incident resolves and `cancel` is called.
//!
//! Every armed timer carries the run's generation. A timer that was already
//! popped when its run got cancelled sees a newer generation and does
//! nothing, so cancellation never lets a stale stage through.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{info, warn};

use sentinel_protocol::Alert;

use crate::driver::SessionDriver;
use crate::error::{Result, SentinelError};
use crate::notifier::Notifier;
use crate::sync::lock;
use crate::timers::{TimerId, TimerQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Reload the current page.
    MildRecovery,
    /// Refresh session resources, then reload the page.
    ResourceAndSessionReload,
    /// Recreate the session from scratch.
    SessionRecreate,
    /// Give up on this iteration and start over from stage one.
    Restart,
}

impl RecoveryAction {
    pub fn describe(&self) -> &'static str {
        match self {
            RecoveryAction::MildRecovery => "Page reload",
            RecoveryAction::ResourceAndSessionReload => "Proxy reload and page reload",
            RecoveryAction::SessionRecreate => "Page hard reload",
            RecoveryAction::Restart => "All fix attempts failed. Retrying from the beginning",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LadderStage {
    /// Offset from the start of the run.
    pub delay: Duration,
    pub action: RecoveryAction,
}

pub fn default_stages() -> Vec<LadderStage> {
    vec![
        LadderStage {
            delay: Duration::from_secs(30),
            action: RecoveryAction::MildRecovery,
        },
        LadderStage {
            delay: Duration::from_secs(60),
            action: RecoveryAction::ResourceAndSessionReload,
        },
        LadderStage {
            delay: Duration::from_secs(120),
            action: RecoveryAction::SessionRecreate,
        },
        LadderStage {
            delay: Duration::from_secs(180),
            action: RecoveryAction::Restart,
        },
    ]
}

#[derive(Debug, Default)]
struct LadderRun {
    generation: u64,
    active: bool,
    iteration: u32,
    pending: Vec<TimerId>,
}

pub struct RecoveryLadder {
    timers: Arc<TimerQueue>,
    driver: Arc<dyn SessionDriver>,
    notifier: Arc<dyn Notifier>,
    stages: Vec<LadderStage>,
    run: Mutex<LadderRun>,
    weak_self: Weak<RecoveryLadder>,
}

impl RecoveryLadder {
    pub fn new(
        timers: Arc<TimerQueue>,
        driver: Arc<dyn SessionDriver>,
        notifier: Arc<dyn Notifier>,
        stages: Vec<LadderStage>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            timers,
            driver,
            notifier,
            stages,
            run: Mutex::new(LadderRun::default()),
            weak_self: weak_self.clone(),
        })
    }

    /// Arms every stage relative to now. Fails if a run is already active;
    /// the caller owns exactly one run per incident.
    pub fn start(&self) -> Result<()> {
        let mut run = lock(&self.run);
        if run.active {
            return Err(SentinelError::LadderAlreadyRunning {
                iteration: run.iteration,
            });
        }
        run.active = true;
        run.iteration = 1;
        self.arm(&mut run);
        info!(stages = self.stages.len(), "Recovery ladder started");
        Ok(())
    }

    /// Clears every pending stage. Safe to call when nothing is running.
    pub fn cancel(&self) -> bool {
        let mut run = lock(&self.run);
        let was_active = run.active;
        self.disarm(&mut run);
        run.active = false;
        if was_active {
            info!(iteration = run.iteration, "Recovery ladder cancelled");
        }
        was_active
    }

    pub fn is_running(&self) -> bool {
        lock(&self.run).active
    }

    pub fn iteration(&self) -> u32 {
        lock(&self.run).iteration
    }

    pub fn pending_stages(&self) -> usize {
        lock(&self.run).pending.len()
    }

    fn arm(&self, run: &mut LadderRun) {
        run.generation += 1;
        let generation = run.generation;
        let start = self.timers.now();

        for (index, stage) in self.stages.iter().enumerate() {
            let ladder = self.weak_self.clone();
            let id = self.timers.schedule_at(
                crate::clock::offset(start, stage.delay),
                "ladder_stage",
                Box::new(move || {
                    if let Some(ladder) = ladder.upgrade() {
                        ladder.fire(generation, index);
                    }
                }),
            );
            run.pending.push(id);
        }
    }

    fn disarm(&self, run: &mut LadderRun) {
        for id in run.pending.drain(..) {
            self.timers.cancel(id);
        }
        run.generation += 1;
    }

    fn fire(&self, generation: u64, index: usize) {
        let Some(stage) = self.stages.get(index).copied() else {
            return;
        };

        let iteration = {
            let mut run = lock(&self.run);
            if !run.active || run.generation != generation {
                return;
            }
            let iteration = run.iteration;
            if stage.action == RecoveryAction::Restart {
                self.disarm(&mut run);
                run.iteration += 1;
                self.arm(&mut run);
            }
            iteration
        };

        let stage_number = index + 1;
        info!(
            iteration,
            stage = stage_number,
            action = ?stage.action,
            "Recovery ladder stage firing"
        );
        self.notifier.notify(&Alert::LadderStage {
            iteration,
            stage: stage_number,
            description: stage.action.describe().to_string(),
        });

        let outcome = match stage.action {
            RecoveryAction::MildRecovery => self.driver.request_mild_recovery(),
            RecoveryAction::ResourceAndSessionReload => {
                if let Err(err) = self.driver.request_resource_reload() {
                    warn!(iteration, stage = stage_number, error = %err, "Resource reload request failed");
                }
                self.driver.request_session_reload()
            }
            RecoveryAction::SessionRecreate => self.driver.request_session_recreate(),
            RecoveryAction::Restart => Ok(()),
        };
        if let Err(err) = outcome {
            warn!(iteration, stage = stage_number, error = %err, "Recovery action request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{epoch, DriverRequest, RecordingDriver, RecordingNotifier};

    struct Fixture {
        clock: Arc<ManualClock>,
        timers: Arc<TimerQueue>,
        driver: Arc<RecordingDriver>,
        notifier: Arc<RecordingNotifier>,
        ladder: Arc<RecoveryLadder>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(epoch()));
        let timers = Arc::new(TimerQueue::new(clock.clone()));
        let driver = Arc::new(RecordingDriver::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let ladder = RecoveryLadder::new(
            Arc::clone(&timers),
            driver.clone(),
            notifier.clone(),
            default_stages(),
        );
        Fixture {
            clock,
            timers,
            driver,
            notifier,
            ladder,
        }
    }

    fn advance(fx: &Fixture, secs: u64) {
        fx.clock.advance(Duration::from_secs(secs));
        fx.timers.fire_due();
    }

    #[test]
    fn stages_fire_at_absolute_offsets() {
        let fx = fixture();
        fx.ladder.start().expect("start ladder");
        assert_eq!(fx.ladder.pending_stages(), 4);

        advance(&fx, 29);
        assert!(fx.driver.requests().is_empty());

        advance(&fx, 1);
        assert_eq!(fx.driver.requests(), vec![DriverRequest::MildRecovery]);

        advance(&fx, 30);
        assert_eq!(
            fx.driver.requests(),
            vec![
                DriverRequest::MildRecovery,
                DriverRequest::ResourceReload,
                DriverRequest::SessionReload
            ]
        );

        advance(&fx, 60);
        assert_eq!(
            fx.driver.requests().last(),
            Some(&DriverRequest::SessionRecreate)
        );
        assert_eq!(fx.notifier.ladder_stages(), 3);
    }

    #[test]
    fn cancel_before_first_stage_prevents_all_actions() {
        let fx = fixture();
        fx.ladder.start().expect("start ladder");

        advance(&fx, 10);
        assert!(fx.ladder.cancel());
        advance(&fx, 600);

        assert!(fx.driver.requests().is_empty());
        assert_eq!(fx.notifier.ladder_stages(), 0);
        assert_eq!(fx.timers.pending(), 0);
        assert!(!fx.ladder.is_running());
    }

    #[test]
    fn cancel_is_idempotent() {
        let fx = fixture();
        assert!(!fx.ladder.cancel());
        fx.ladder.start().expect("start ladder");
        assert!(fx.ladder.cancel());
        assert!(!fx.ladder.cancel());
    }

    #[test]
    fn second_start_is_rejected_without_arming() {
        let fx = fixture();
        fx.ladder.start().expect("start ladder");
        let err = fx.ladder.start().expect_err("second start");
        assert!(matches!(err, SentinelError::LadderAlreadyRunning { iteration: 1 }));
        assert_eq!(fx.timers.pending(), 4);
    }

    #[test]
    fn final_stage_restarts_from_stage_one() {
        let fx = fixture();
        fx.ladder.start().expect("start ladder");

        advance(&fx, 180);
        assert_eq!(fx.ladder.iteration(), 2);
        assert!(fx.ladder.is_running());
        assert_eq!(fx.ladder.pending_stages(), 4);
        assert_eq!(fx.notifier.ladder_stages(), 4);

        // Second iteration keeps the same cadence from the restart instant.
        advance(&fx, 30);
        let last = fx.notifier.alerts().last().cloned();
        assert_eq!(
            last,
            Some(Alert::LadderStage {
                iteration: 2,
                stage: 1,
                description: "Page reload".to_string(),
            })
        );
    }

    #[test]
    fn stale_timer_from_cancelled_run_is_ignored() {
        let fx = fixture();
        fx.ladder.start().expect("start ladder");
        let stale_generation = lock(&fx.ladder.run).generation;
        fx.ladder.cancel();
        fx.ladder.start().expect("restart ladder");

        // Simulate a stage popped just before the cancel landed.
        fx.ladder.fire(stale_generation, 0);
        assert!(fx.driver.requests().is_empty());
    }

    #[test]
    fn failed_driver_request_is_logged_not_fatal() {
        let clock = Arc::new(ManualClock::new(epoch()));
        let timers = Arc::new(TimerQueue::new(clock.clone()));
        let driver = Arc::new(RecordingDriver::failing());
        let notifier = Arc::new(RecordingNotifier::default());
        let ladder = RecoveryLadder::new(
            Arc::clone(&timers),
            driver.clone(),
            notifier.clone(),
            default_stages(),
        );

        ladder.start().expect("start ladder");
        clock.advance(Duration::from_secs(60));
        timers.fire_due();

        // A failed resource reload still leads to the paired session reload.
        assert_eq!(
            driver.requests(),
            vec![
                DriverRequest::MildRecovery,
                DriverRequest::ResourceReload,
                DriverRequest::SessionReload
            ]
        );
        assert_eq!(notifier.ladder_stages(), 2);
        assert!(ladder.is_running());
    }
}
