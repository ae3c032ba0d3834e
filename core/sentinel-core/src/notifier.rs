//! Outbound alert seam.
//!
//! Delivery is fire-and-forget: implementations log their own transport
//! failures and never report them back to the engine.

use sentinel_protocol::{Alert, AlertChannel};
use tracing::{info, warn};

pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert);
}

/// Writes rendered alerts to the log. Used when no transport is configured.
#[derive(Debug, Clone)]
pub struct TracingNotifier {
    account: String,
}

impl TracingNotifier {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }
}

impl Notifier for TracingNotifier {
    fn notify(&self, alert: &Alert) {
        let message = alert.render(&self.account);
        match alert.channel() {
            AlertChannel::Main => info!(urgent = alert.is_urgent(), %message, "Alert"),
            AlertChannel::Errors => warn!(urgent = alert.is_urgent(), %message, "Alert"),
        }
    }
}
