//! Timer-driven producers that feed the job scheduler.
//!
//! A producer fires once when started, then `interval` after each of its runs
//! completes. Measuring from completion keeps a slow session from piling up
//! ticks of the same producer in the queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info};

use crate::scheduler::JobScheduler;
use crate::sync::lock;
use crate::timers::{TimerId, TimerQueue};

pub type ProducerOp = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Debug, Default)]
struct ProducerState {
    running: bool,
    generation: u64,
    pending: Option<TimerId>,
}

pub struct Producer {
    name: String,
    interval: Duration,
    operation: ProducerOp,
    timers: Arc<TimerQueue>,
    scheduler: Arc<JobScheduler>,
    state: Mutex<ProducerState>,
    runs: AtomicU64,
    weak_self: Weak<Producer>,
}

/// Schedules the next tick once the job holding it finishes, panicked or not.
struct RearmOnDrop {
    producer: Arc<Producer>,
    generation: u64,
}

impl Drop for RearmOnDrop {
    fn drop(&mut self) {
        self.producer.runs.fetch_add(1, Ordering::SeqCst);
        self.producer.arm_after_run(self.generation);
    }
}

impl Producer {
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        operation: ProducerOp,
        timers: Arc<TimerQueue>,
        scheduler: Arc<JobScheduler>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            name: name.into(),
            interval,
            operation,
            timers,
            scheduler,
            state: Mutex::new(ProducerState::default()),
            runs: AtomicU64::new(0),
            weak_self: weak_self.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Completed runs, including ones that panicked.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn start(&self) {
        let mut state = lock(&self.state);
        if state.running {
            return;
        }
        state.running = true;
        state.generation += 1;
        self.arm(&mut state, Duration::ZERO);
        info!(producer = %self.name, interval_secs = self.interval.as_secs(), "Producer started");
    }

    /// Cancels the next tick. A run already queued still completes but does
    /// not re-arm.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if !state.running {
            return;
        }
        state.running = false;
        state.generation += 1;
        if let Some(id) = state.pending.take() {
            self.timers.cancel(id);
        }
        info!(producer = %self.name, "Producer stopped");
    }

    fn arm(&self, state: &mut ProducerState, delay: Duration) {
        let generation = state.generation;
        let producer = self.weak_self.clone();
        state.pending = Some(self.timers.schedule_in(
            delay,
            "producer_tick",
            Box::new(move || {
                if let Some(producer) = producer.upgrade() {
                    producer.tick(generation);
                }
            }),
        ));
    }

    fn tick(&self, generation: u64) {
        {
            let mut state = lock(&self.state);
            if !state.running || state.generation != generation {
                return;
            }
            state.pending = None;
        }

        let Some(producer) = self.weak_self.upgrade() else {
            return;
        };
        let operation = Arc::clone(&self.operation);
        debug!(producer = %self.name, "Producer tick submitted");
        // Completion is observed through the re-arm guard, not the handle.
        let _ = self.scheduler.submit(&self.name, move || {
            let _rearm = RearmOnDrop {
                producer,
                generation,
            };
            operation();
        });
    }

    fn arm_after_run(&self, generation: u64) {
        let mut state = lock(&self.state);
        if !state.running || state.generation != generation || state.pending.is_some() {
            return;
        }
        self.arm(&mut state, self.interval);
    }
}
