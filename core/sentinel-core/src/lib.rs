//! # sentinel-core
//!
//! Orchestration core for monitoring one remote, stateful session: it
//! schedules session operations, reconciles observed records against what was
//! seen before, and raises throttled alerts and staged recovery when the
//! session degrades.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. One scheduler worker thread and one
//!   timer pump thread do all the work.
//! - **Single flight**: Every session operation, recovery requests included,
//!   runs through `JobScheduler`, one at a time, FIFO.
//! - **Never throws at the edges**: `handle_cycle`, `handle_error` and
//!   `set_state` log collaborator failures and turn them into incidents.
//! - **Injected time**: All timers live in one `TimerQueue` over a `Clock`, so
//!   tests drive hours of behaviour with `ManualClock` and `fire_due`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sentinel_core::{load_config, Monitor, MonitorParts, SessionProducers, TracingNotifier};
//!
//! let config = load_config(None)?;
//! let _guard = sentinel_core::logging::init(&config.logging)?;
//! let parts = MonitorParts::production(&config, driver, Arc::new(TracingNotifier::new(&config.account)))?;
//! let monitor = Monitor::new(&config, parts)?;
//! monitor.add_session_producers(SessionProducers { lean_poll, full_reload, dialog_poll, snapshot });
//! monitor.start();
//! monitor.spawn_timer_pump()?;
//! ```

mod sync;

pub mod clock;
pub mod config;
pub mod cycle;
pub mod db;
pub mod driver;
pub mod engine;
pub mod error;
pub mod inactivity;
pub mod incident;
pub mod ladder;
pub mod logging;
pub mod monitor;
pub mod notifier;
pub mod producers;
pub mod reconcile;
pub mod retention;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod testing;
pub mod timers;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, SentinelConfig};
pub use cycle::{CycleDurationGate, CycleTimer};
pub use db::SqliteStore;
pub use driver::{QueuedDriver, SessionDriver};
pub use engine::{DecisionEngine, EngineParts};
pub use error::{Result, SentinelError};
pub use inactivity::InactivityWatchdog;
pub use incident::{IncidentTracker, NotifyWindows};
pub use ladder::{default_stages, LadderStage, RecoveryAction, RecoveryLadder};
pub use monitor::{Monitor, MonitorParts, SessionProducers};
pub use notifier::{Notifier, TracingNotifier};
pub use producers::{Producer, ProducerOp};
pub use reconcile::{reconcile, Reconciliation};
pub use retention::RetentionSweep;
pub use scheduler::{JobHandle, JobScheduler};
pub use session::{SessionMachine, StateObserver};
pub use store::{MemoryStore, RecordStore};
pub use timers::{TimerId, TimerQueue};

pub use sentinel_protocol as protocol;
