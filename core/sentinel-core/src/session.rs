//! Session lifecycle state, owned by the driver side.

use sentinel_protocol::SessionState;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::sync::lock;

pub trait StateObserver: Send + Sync {
    fn on_state_change(&self, old: SessionState, new: SessionState);
}

pub struct SessionMachine {
    state: Mutex<SessionState>,
    observer: Arc<dyn StateObserver>,
}

impl SessionMachine {
    pub fn new(observer: Arc<dyn StateObserver>) -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            observer,
        }
    }

    /// Records a transition and reports it before returning. Setting the
    /// current state again is a no-op. Returns whether the state changed.
    ///
    /// The observer runs under the state lock, so concurrent transitions are
    /// reported in the order they were applied.
    pub fn set_state(&self, new: SessionState) -> bool {
        let mut state = lock(&self.state);
        let old = *state;
        if old == new {
            return false;
        }
        *state = new;
        info!(from = old.as_str(), to = new.as_str(), "Session state changed");
        self.observer.on_state_change(old, new);
        true
    }

    pub fn current(&self) -> SessionState {
        *lock(&self.state)
    }
}
