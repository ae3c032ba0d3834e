//! Error types for sentinel-core operations.
//!
//! Public engine entry points never surface these; they log and convert
//! failures into incidents. `SentinelError` is for the plumbing underneath
//! (storage, configuration, scheduling) and for collaborator traits.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Logging setup failed: {0}")]
    Logging(String),

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("SQLite error: {context}: {source}")]
    Sqlite {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Scheduling Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Scheduler stopped before job {label} could run")]
    SchedulerStopped { label: String },

    #[error("Job {label} panicked")]
    JobPanicked { label: String },

    #[error("Timed out waiting for job {label}")]
    JobWaitTimedOut { label: String },

    // ─────────────────────────────────────────────────────────────────────
    // Recovery Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Recovery ladder already running (iteration {iteration})")]
    LadderAlreadyRunning { iteration: u32 },

    #[error("Session driver request failed: {0}")]
    Driver(String),
}

pub type Result<T> = std::result::Result<T, SentinelError>;

impl From<SentinelError> for String {
    fn from(err: SentinelError) -> String {
        err.to_string()
    }
}
