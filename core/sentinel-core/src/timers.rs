//! One-shot timers keyed by deadline.
//!
//! Every timer in the sentinel (ladder stages, the inactivity watchdog,
//! producer ticks) lives in a single `TimerQueue`. Production code drives it
//! with a pump thread; tests drive it by advancing a `ManualClock` and calling
//! `fire_due`.
//!
//! Callbacks run with the queue unlocked, so they may schedule or cancel other
//! timers (including re-arming themselves). Each callback is isolated with
//! `catch_unwind`: a panicking callback is logged and its siblings still fire.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

use crate::clock::{offset, Clock};
use crate::error::{Result, SentinelError};
use crate::sync::lock;

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

struct PendingTimer {
    label: &'static str,
    callback: TimerCallback,
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    by_deadline: BTreeMap<(DateTime<Utc>, TimerId), PendingTimer>,
    deadlines: HashMap<TimerId, DateTime<Utc>>,
}

pub struct TimerQueue {
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
    stopped: AtomicBool,
}

impl TimerQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(QueueState::default()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn schedule_at(
        &self,
        deadline: DateTime<Utc>,
        label: &'static str,
        callback: TimerCallback,
    ) -> TimerId {
        let mut state = lock(&self.state);
        let id = TimerId(state.next_id);
        state.next_id += 1;
        state
            .by_deadline
            .insert((deadline, id), PendingTimer { label, callback });
        state.deadlines.insert(id, deadline);
        debug!(timer = label, deadline = %deadline.to_rfc3339(), "Timer scheduled");
        id
    }

    pub fn schedule_in(
        &self,
        delay: Duration,
        label: &'static str,
        callback: TimerCallback,
    ) -> TimerId {
        self.schedule_at(offset(self.now(), delay), label, callback)
    }

    /// Returns `true` if the timer was still pending.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut state = lock(&self.state);
        match state.deadlines.remove(&id) {
            Some(deadline) => state.by_deadline.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        lock(&self.state).deadlines.contains_key(&id)
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).deadlines.len()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        lock(&self.state)
            .by_deadline
            .keys()
            .next()
            .map(|(deadline, _)| *deadline)
    }

    /// Fires every timer whose deadline has passed, earliest first (ties in
    /// scheduling order). Timers scheduled by callbacks during this pass wait
    /// for the next one. Returns how many callbacks ran.
    pub fn fire_due(&self) -> usize {
        let now = self.now();
        let horizon = TimerId(lock(&self.state).next_id);
        let mut fired = 0;

        while let Some((id, timer)) = self.pop_due(now, horizon) {
            fired += 1;
            let PendingTimer { label, callback } = timer;
            debug!(timer = label, timer_id = id.0, "Timer firing");
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                error!(timer = label, timer_id = id.0, "Timer callback panicked");
            }
        }

        fired
    }

    fn pop_due(&self, now: DateTime<Utc>, horizon: TimerId) -> Option<(TimerId, PendingTimer)> {
        let mut state = lock(&self.state);
        let key = state
            .by_deadline
            .keys()
            .take_while(|(deadline, _)| *deadline <= now)
            .find(|(_, id)| *id < horizon)
            .copied()?;
        state.deadlines.remove(&key.1);
        state.by_deadline.remove(&key).map(|timer| (key.1, timer))
    }

    /// Drives the queue from a background thread until `stop` is called.
    pub fn spawn_pump(self: &Arc<Self>, tick: Duration) -> Result<JoinHandle<()>> {
        let queue = Arc::clone(self);
        thread::Builder::new()
            .name("sentinel-timers".to_string())
            .spawn(move || {
                while !queue.stopped.load(Ordering::SeqCst) {
                    queue.fire_due();
                    thread::sleep(tick);
                }
                debug!("Timer pump stopped");
            })
            .map_err(|source| SentinelError::Io {
                context: "spawn timer pump".to_string(),
                source,
            })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
