//! Decision engine: turns session outcomes into tracked state and alerts.
//!
//! The engine is the only consumer of cycle results, failures and state
//! transitions. None of its entry points return errors. Collaborator failures
//! become log lines and, where the session is involved, incidents.

use sentinel_protocol::{
    Alert, FailureKind, ObservedBatch, ObservedCycle, SessionFailure, SessionState,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::cycle::CycleDurationGate;
use crate::error::Result;
use crate::inactivity::InactivityWatchdog;
use crate::incident::IncidentTracker;
use crate::notifier::Notifier;
use crate::reconcile::reconcile;
use crate::session::StateObserver;
use crate::store::RecordStore;

const DEFAULT_RECORD_LABEL: &str = "New record";
const LOGOUT_REASON: &str = "session unauthenticated";

pub struct EngineParts {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn RecordStore>,
    pub notifier: Arc<dyn Notifier>,
    pub incidents: IncidentTracker,
    pub watchdog: Arc<InactivityWatchdog>,
    pub cycle_gate: CycleDurationGate,
    /// Alert label per collection name.
    pub labels: HashMap<String, String>,
}

pub struct DecisionEngine {
    clock: Arc<dyn Clock>,
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    incidents: IncidentTracker,
    watchdog: Arc<InactivityWatchdog>,
    cycle_gate: CycleDurationGate,
    labels: HashMap<String, String>,
}

impl DecisionEngine {
    pub fn new(parts: EngineParts) -> Self {
        Self {
            clock: parts.clock,
            store: parts.store,
            notifier: parts.notifier,
            incidents: parts.incidents,
            watchdog: parts.watchdog,
            cycle_gate: parts.cycle_gate,
            labels: parts.labels,
        }
    }

    /// Arms the inactivity watchdog for the first cycle.
    pub fn init(&self) {
        self.watchdog.rearm();
        debug!(period_secs = self.watchdog.period().as_secs(), "Decision engine ready");
    }

    pub fn handle_state_change(&self, old: SessionState, new: SessionState) {
        match new {
            SessionState::Unauthenticated => {
                self.watchdog.disable();
                self.incidents.resolve_all(Some(LOGOUT_REASON));
                self.notifier.notify(&Alert::LoggedOut);
            }
            SessionState::Authenticated => {
                self.notifier.notify(&Alert::LoggedIn);
            }
            SessionState::Idle | SessionState::Ready => {
                debug!(from = old.as_str(), to = new.as_str(), "No action for transition");
            }
        }
    }

    /// Applies a successful session operation. Any success, even one that
    /// observed nothing, resolves every open incident.
    pub fn handle_cycle(&self, cycle: ObservedCycle) {
        self.watchdog.rearm();
        self.incidents.resolve_all(None);

        for batch in &cycle.batches {
            if let Err(err) = self.reconcile_collection(batch) {
                warn!(
                    collection = %batch.collection,
                    error = %err,
                    "Reconciliation failed; collection skipped"
                );
                self.incidents.handle(&SessionFailure::unclassified(format!(
                    "Failed to reconcile {}: {}",
                    batch.collection, err
                )));
            }
        }

        if let Some(report) = cycle.report {
            if self.cycle_gate.check(&report, self.clock.now()) {
                self.notifier.notify(&Alert::CycleDurationExceeded { report });
            }
        }
    }

    /// Merges one batch into its stored collection and announces arrivals.
    /// Returns the number of new records.
    pub fn reconcile_collection(&self, batch: &ObservedBatch) -> Result<usize> {
        let stored = self.store.load(&batch.collection)?;
        let result = reconcile(stored, &batch.records, self.clock.now());
        self.store.save(&batch.collection, &result.updated)?;

        let label = self
            .labels
            .get(&batch.collection)
            .map(String::as_str)
            .unwrap_or(DEFAULT_RECORD_LABEL);
        for record in &result.arrived {
            info!(collection = %batch.collection, key = %record.key, "New record");
            self.notifier.notify(&Alert::NewRecord {
                collection: batch.collection.clone(),
                label: label.to_string(),
                record: record.clone(),
            });
        }

        debug!(
            collection = %batch.collection,
            observed = batch.records.len(),
            tracked = result.updated.len(),
            arrived = result.arrived.len(),
            "Collection reconciled"
        );
        Ok(result.arrived.len())
    }

    pub fn handle_error(&self, failure: &SessionFailure) {
        warn!(kind = failure.kind().as_str(), detail = %failure.detail(), "Session operation failed");
        self.incidents.handle(failure);
    }

    pub fn incidents(&self) -> &IncidentTracker {
        &self.incidents
    }

    pub fn has_open_incident(&self) -> bool {
        FailureKind::ALL
            .iter()
            .any(|kind| self.incidents.open_incident(*kind).is_some())
    }
}

impl StateObserver for DecisionEngine {
    fn on_state_change(&self, old: SessionState, new: SessionState) {
        self.handle_state_change(old, new);
    }
}
