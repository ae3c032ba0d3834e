//! Recording fakes for wiring the sentinel up in tests.

use chrono::{DateTime, TimeZone, Utc};
use sentinel_protocol::{Alert, FailureKind};
use std::sync::Mutex;

use crate::driver::SessionDriver;
use crate::error::{Result, SentinelError};
use crate::notifier::Notifier;
use crate::sync::lock;

/// A fixed, readable starting instant for `ManualClock`s.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.alerts).clone()
    }

    pub fn clear(&self) {
        lock(&self.alerts).clear();
    }

    pub fn count(&self, predicate: impl Fn(&Alert) -> bool) -> usize {
        lock(&self.alerts).iter().filter(|alert| predicate(alert)).count()
    }

    pub fn opened(&self, kind: FailureKind) -> usize {
        self.count(|alert| matches!(alert, Alert::IncidentOpened { kind: k, .. } if *k == kind))
    }

    pub fn resolved(&self, kind: FailureKind) -> usize {
        self.count(
            |alert| matches!(alert, Alert::IncidentResolved { kind: k, .. } if *k == kind),
        )
    }

    pub fn ladder_stages(&self) -> usize {
        self.count(|alert| matches!(alert, Alert::LadderStage { .. }))
    }

    pub fn inactivity(&self) -> usize {
        self.count(|alert| matches!(alert, Alert::Inactivity { .. }))
    }

    pub fn new_records(&self) -> Vec<String> {
        lock(&self.alerts)
            .iter()
            .filter_map(|alert| match alert {
                Alert::NewRecord { record, .. } => Some(record.key.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, alert: &Alert) {
        lock(&self.alerts).push(alert.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverRequest {
    MildRecovery,
    ResourceReload,
    SessionReload,
    SessionRecreate,
}

#[derive(Debug, Default)]
pub struct RecordingDriver {
    requests: Mutex<Vec<DriverRequest>>,
    fail: bool,
}

impl RecordingDriver {
    /// Records requests but reports each one as failed.
    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn requests(&self) -> Vec<DriverRequest> {
        lock(&self.requests).clone()
    }

    fn record(&self, request: DriverRequest) -> Result<()> {
        lock(&self.requests).push(request);
        if self.fail {
            return Err(SentinelError::Driver(format!("{:?} refused", request)));
        }
        Ok(())
    }
}

impl SessionDriver for RecordingDriver {
    fn request_mild_recovery(&self) -> Result<()> {
        self.record(DriverRequest::MildRecovery)
    }

    fn request_resource_reload(&self) -> Result<()> {
        self.record(DriverRequest::ResourceReload)
    }

    fn request_session_reload(&self) -> Result<()> {
        self.record(DriverRequest::SessionReload)
    }

    fn request_session_recreate(&self) -> Result<()> {
        self.record(DriverRequest::SessionRecreate)
    }
}
