//! Per-kind incident bookkeeping with throttled re-notification.
//!
//! An incident opens on the first failure of its kind since the last
//! resolution and stays open until a successful cycle (or logout) resolves
//! it. Repeated failures while open are announced at most once per window.
//! Classified incidents own a recovery ladder run for their whole lifetime.

use chrono::{DateTime, Utc};
use sentinel_protocol::{Alert, FailureKind, SessionFailure};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::{offset, Clock};
use crate::ladder::RecoveryLadder;
use crate::notifier::Notifier;
use crate::sync::lock;

/// Minimum spacing between notifications for an open incident, per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyWindows {
    pub classified: Duration,
    pub unclassified: Duration,
}

impl NotifyWindows {
    pub fn for_kind(&self, kind: FailureKind) -> Duration {
        match kind {
            FailureKind::Classified => self.classified,
            FailureKind::Unclassified => self.unclassified,
        }
    }
}

impl Default for NotifyWindows {
    fn default() -> Self {
        Self {
            classified: Duration::from_secs(120),
            unclassified: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct IncidentSlot {
    id: Option<String>,
    next_notify_not_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Slots {
    classified: IncidentSlot,
    unclassified: IncidentSlot,
}

impl Slots {
    fn get_mut(&mut self, kind: FailureKind) -> &mut IncidentSlot {
        match kind {
            FailureKind::Classified => &mut self.classified,
            FailureKind::Unclassified => &mut self.unclassified,
        }
    }

    fn get(&self, kind: FailureKind) -> &IncidentSlot {
        match kind {
            FailureKind::Classified => &self.classified,
            FailureKind::Unclassified => &self.unclassified,
        }
    }
}

pub struct IncidentTracker {
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    ladder: Arc<RecoveryLadder>,
    windows: NotifyWindows,
    slots: Mutex<Slots>,
}

impl IncidentTracker {
    pub fn new(
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        ladder: Arc<RecoveryLadder>,
        windows: NotifyWindows,
    ) -> Self {
        Self {
            clock,
            notifier,
            ladder,
            windows,
            slots: Mutex::new(Slots::default()),
        }
    }

    pub fn handle(&self, failure: &SessionFailure) {
        let kind = failure.kind();
        let now = self.clock.now();
        let mut slots = lock(&self.slots);
        let slot = slots.get_mut(kind);

        let incident_id = match slot.id.clone() {
            Some(id) => id,
            None => {
                let id = Ulid::new().to_string();
                slot.id = Some(id.clone());
                slot.next_notify_not_before = None;
                info!(kind = kind.as_str(), incident_id = %id, "Incident opened");
                if kind == FailureKind::Classified {
                    if let Err(err) = self.ladder.start() {
                        warn!(incident_id = %id, error = %err, "Recovery ladder not started");
                    }
                }
                id
            }
        };

        if let Some(gate) = slot.next_notify_not_before {
            if now < gate {
                debug!(
                    kind = kind.as_str(),
                    incident_id = %incident_id,
                    "Incident notification suppressed"
                );
                return;
            }
        }

        slot.next_notify_not_before = Some(offset(now, self.windows.for_kind(kind)));
        self.notifier.notify(&Alert::IncidentOpened {
            kind,
            incident_id,
            detail: failure.detail(),
        });
    }

    /// Closes the incident of `kind` if one is open. Returns whether it was.
    pub fn resolve(&self, kind: FailureKind, reason: Option<&str>) -> bool {
        let mut slots = lock(&self.slots);
        let slot = slots.get_mut(kind);
        let Some(incident_id) = slot.id.take() else {
            return false;
        };
        slot.next_notify_not_before = None;

        if kind == FailureKind::Classified {
            self.ladder.cancel();
        }

        info!(
            kind = kind.as_str(),
            incident_id = %incident_id,
            reason = reason.unwrap_or("-"),
            "Incident resolved"
        );
        self.notifier.notify(&Alert::IncidentResolved {
            kind,
            incident_id,
            reason: reason.map(str::to_string),
        });
        true
    }

    pub fn resolve_all(&self, reason: Option<&str>) {
        for kind in FailureKind::ALL {
            self.resolve(kind, reason);
        }
    }

    pub fn open_incident(&self, kind: FailureKind) -> Option<String> {
        lock(&self.slots).get(kind).id.clone()
    }
}
