//! Shared types for the session sentinel.
//!
//! The session driver, the decision engine and alert transports all speak in
//! these types, so they live in their own crate to prevent schema drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const KEY_SEPARATOR: &str = ":::";
const MISSING_KEY_PART: &str = "-";

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// Recency bookkeeping attached to every tracked record.
///
/// Both fields are optional so that snapshots written by older builds (or by
/// hand) still load; reconciliation heals missing values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// A business entity whose presence over time is monitored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRecord {
    pub key: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

/// A record as extracted from the session, before reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedRecord {
    pub key: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl ObservedRecord {
    pub fn new(key: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }

    /// Builds a record whose key is derived from `key_fields`, in order.
    pub fn keyed_by(fields: Map<String, Value>, key_fields: &[&str]) -> Self {
        let key = record_key(
            key_fields
                .iter()
                .map(|name| fields.get(*name).and_then(Value::as_str)),
        );
        Self { key, fields }
    }
}

/// Derives a stable record key from immutable business fields.
///
/// Missing or blank parts are written as `-` so that the position of every
/// part stays fixed.
pub fn record_key<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    parts
        .into_iter()
        .map(|part| match part.map(str::trim) {
            Some(value) if !value.is_empty() => value,
            _ => MISSING_KEY_PART,
        })
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

/// Records observed for one tracked collection during one session operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedBatch {
    pub collection: String,
    pub records: Vec<ObservedRecord>,
}

impl ObservedBatch {
    pub fn new(collection: impl Into<String>, records: Vec<ObservedRecord>) -> Self {
        Self {
            collection: collection.into(),
            records,
        }
    }
}

/// Everything a successful session operation reports back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedCycle {
    #[serde(default)]
    pub batches: Vec<ObservedBatch>,
    #[serde(default)]
    pub report: Option<CycleReport>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cycle timing
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedStep {
    pub name: String,
    pub duration_ms: u64,
}

/// Step-by-step timing of one session operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub total_ms: u64,
    pub steps: Vec<TimedStep>,
}

impl CycleReport {
    pub fn render(&self) -> String {
        let mut out = format!("TOTAL_DURATION: {}\n----------\n", self.total_ms);
        for step in &self.steps {
            out.push_str(&format!("{:<10}: {}\n", step.duration_ms, step.name));
        }
        out
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Ready,
    Authenticated,
    Unauthenticated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Ready => "ready",
            SessionState::Authenticated => "authenticated",
            SessionState::Unauthenticated => "unauthenticated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(SessionState::Idle),
            "ready" => Some(SessionState::Ready),
            "authenticated" => Some(SessionState::Authenticated),
            "unauthenticated" => Some(SessionState::Unauthenticated),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Failures
// ═══════════════════════════════════════════════════════════════════════════════

/// Known failure points of a session operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FailedToReload,
    FailedToWaitForPageHeader,
    FailedToCheckLoggedIn,
    FailedToWaitForRecordsHeader,
    FailedToOpenRecordsView,
    FailedToWaitForRecordsContainer,
    FailedToCheckEmptyRecordsContainer,
    FailedToWaitForRecordItems,
    FailedToExpandCollapsedRecords,
    FailedToCaptureRecords,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FailedToReload => "FAILED_TO_RELOAD",
            ErrorCode::FailedToWaitForPageHeader => "FAILED_TO_WAIT_FOR_PAGE_HEADER",
            ErrorCode::FailedToCheckLoggedIn => "FAILED_TO_CHECK_LOGGED_IN",
            ErrorCode::FailedToWaitForRecordsHeader => "FAILED_TO_WAIT_FOR_RECORDS_HEADER",
            ErrorCode::FailedToOpenRecordsView => "FAILED_TO_OPEN_RECORDS_VIEW",
            ErrorCode::FailedToWaitForRecordsContainer => "FAILED_TO_WAIT_FOR_RECORDS_CONTAINER",
            ErrorCode::FailedToCheckEmptyRecordsContainer => {
                "FAILED_TO_CHECK_EMPTY_RECORDS_CONTAINER"
            }
            ErrorCode::FailedToWaitForRecordItems => "FAILED_TO_WAIT_FOR_RECORD_ITEMS",
            ErrorCode::FailedToExpandCollapsedRecords => "FAILED_TO_EXPAND_COLLAPSED_RECORDS",
            ErrorCode::FailedToCaptureRecords => "FAILED_TO_CAPTURE_RECORDS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Classified,
    Unclassified,
}

impl FailureKind {
    pub const ALL: [FailureKind; 2] = [FailureKind::Classified, FailureKind::Unclassified];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Classified => "classified",
            FailureKind::Unclassified => "unclassified",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            FailureKind::Classified => "Known session error",
            FailureKind::Unclassified => "Unknown error",
        }
    }
}

/// A failed session operation, classified by the driver where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SessionFailure {
    Classified { code: ErrorCode, message: String },
    Unclassified { message: String },
}

impl SessionFailure {
    pub fn classified(code: ErrorCode, message: impl Into<String>) -> Self {
        SessionFailure::Classified {
            code,
            message: message.into(),
        }
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        SessionFailure::Unclassified {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            SessionFailure::Classified { .. } => FailureKind::Classified,
            SessionFailure::Unclassified { .. } => FailureKind::Unclassified,
        }
    }

    /// Human-readable detail used in incident alerts.
    pub fn detail(&self) -> String {
        match self {
            SessionFailure::Classified { code, message } => {
                format!("{}: {}", code.as_str(), message)
            }
            SessionFailure::Unclassified { message } => message.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Alerts
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Main,
    Errors,
}

/// Everything the sentinel can tell the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    AppLaunched,
    LoggedIn,
    LoggedOut,
    NewRecord {
        collection: String,
        label: String,
        record: TrackedRecord,
    },
    IncidentOpened {
        kind: FailureKind,
        incident_id: String,
        detail: String,
    },
    IncidentResolved {
        kind: FailureKind,
        incident_id: String,
        reason: Option<String>,
    },
    Inactivity {
        after_secs: u64,
    },
    LadderStage {
        iteration: u32,
        stage: usize,
        description: String,
    },
    CycleDurationExceeded {
        report: CycleReport,
    },
}

impl Alert {
    pub fn channel(&self) -> AlertChannel {
        match self {
            Alert::AppLaunched | Alert::LoggedIn | Alert::LoggedOut | Alert::NewRecord { .. } => {
                AlertChannel::Main
            }
            Alert::IncidentOpened { .. }
            | Alert::IncidentResolved { .. }
            | Alert::Inactivity { .. }
            | Alert::LadderStage { .. }
            | Alert::CycleDurationExceeded { .. } => AlertChannel::Errors,
        }
    }

    /// Alerts that should page the operator, not just post a message.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Alert::LoggedOut | Alert::NewRecord { .. })
    }

    pub fn render(&self, account: &str) -> String {
        let body = match self {
            Alert::AppLaunched => "App launched".to_string(),
            Alert::LoggedIn => "Logged in".to_string(),
            Alert::LoggedOut => "Logged out".to_string(),
            Alert::NewRecord { label, record, .. } => {
                format!("{}:\n{}", label, render_fields(&record.fields))
            }
            Alert::IncidentOpened {
                kind,
                incident_id,
                detail,
            } => format!("🚨{}\n#{}\n{}", kind.title(), incident_id, detail),
            Alert::IncidentResolved {
                kind,
                incident_id,
                reason,
            } => match reason {
                Some(reason) => format!(
                    "✅️{} resolved\nREASON: {}\n#{}",
                    kind.title(),
                    reason,
                    incident_id
                ),
                None => format!("✅️{} resolved\n#{}", kind.title(), incident_id),
            },
            Alert::Inactivity { after_secs } if *after_secs < 60 => {
                format!("Inactive for {} seconds", after_secs)
            }
            Alert::Inactivity { after_secs } => {
                format!("Inactive for {} minutes", after_secs / 60)
            }
            Alert::LadderStage {
                iteration,
                stage,
                description,
            } => format!("ERROR_REPAIRER: FIX #{}.{}: {}", iteration, stage, description),
            Alert::CycleDurationExceeded { report } => {
                format!("Cycle duration exceeded:\n{}", report.render())
            }
        };
        format!("#{}\n{}", account, body)
    }
}

fn render_fields(fields: &Map<String, Value>) -> String {
    fields
        .iter()
        .map(|(name, value)| match value {
            Value::String(text) => format!("{}: {}", name, text),
            other => format!("{}: {}", name, other),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
