//! Corrective actions the core may ask of the session side.
//!
//! The recovery ladder never touches the session itself. It asks a
//! `SessionDriver`, and `QueuedDriver` makes sure those requests wait their
//! turn in the job scheduler like every other session operation.

use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::scheduler::JobScheduler;

pub trait SessionDriver: Send + Sync {
    /// Light-touch fix, e.g. reloading the current page.
    fn request_mild_recovery(&self) -> Result<()>;
    /// Refreshes resources the session depends on (e.g. the outbound proxy).
    fn request_resource_reload(&self) -> Result<()>;
    fn request_session_reload(&self) -> Result<()>;
    /// Tears the session down and builds a new one.
    fn request_session_recreate(&self) -> Result<()>;
}

/// Forwards every request to `inner` as a scheduled job.
///
/// Requests return as soon as the job is queued; the outcome is logged by the
/// worker.
pub struct QueuedDriver {
    inner: Arc<dyn SessionDriver>,
    scheduler: Arc<JobScheduler>,
}

impl QueuedDriver {
    pub fn new(inner: Arc<dyn SessionDriver>, scheduler: Arc<JobScheduler>) -> Self {
        Self { inner, scheduler }
    }

    fn enqueue(&self, label: &'static str, request: fn(&dyn SessionDriver) -> Result<()>) {
        let inner = Arc::clone(&self.inner);
        // Handle dropped on purpose: the ladder does not wait for its actions.
        let _ = self.scheduler.submit(label, move || {
            if let Err(err) = request(inner.as_ref()) {
                warn!(request = label, error = %err, "Session driver request failed");
            }
        });
    }
}

impl SessionDriver for QueuedDriver {
    fn request_mild_recovery(&self) -> Result<()> {
        self.enqueue("mild_recovery", |driver| driver.request_mild_recovery());
        Ok(())
    }

    fn request_resource_reload(&self) -> Result<()> {
        self.enqueue("resource_reload", |driver| driver.request_resource_reload());
        Ok(())
    }

    fn request_session_reload(&self) -> Result<()> {
        self.enqueue("session_reload", |driver| driver.request_session_reload());
        Ok(())
    }

    fn request_session_recreate(&self) -> Result<()> {
        self.enqueue("session_recreate", |driver| driver.request_session_recreate());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DriverRequest, RecordingDriver};

    #[test]
    fn queued_requests_run_on_the_scheduler_in_order() {
        let scheduler = Arc::new(JobScheduler::start().expect("start scheduler"));
        let recording = Arc::new(RecordingDriver::default());
        let driver = QueuedDriver::new(recording.clone(), Arc::clone(&scheduler));

        driver.request_resource_reload().expect("queue resource reload");
        driver.request_session_reload().expect("queue session reload");
        scheduler.submit("barrier", || ()).wait().expect("barrier");

        assert_eq!(
            recording.requests(),
            vec![DriverRequest::ResourceReload, DriverRequest::SessionReload]
        );
    }

    #[test]
    fn failing_inner_request_does_not_poison_the_queue() {
        let scheduler = Arc::new(JobScheduler::start().expect("start scheduler"));
        let recording = Arc::new(RecordingDriver::failing());
        let driver = QueuedDriver::new(recording.clone(), Arc::clone(&scheduler));

        driver.request_session_recreate().expect("queue recreate");
        let after = scheduler.submit("after", || 7).wait().expect("job after failure");

        assert_eq!(after, 7);
        assert_eq!(recording.requests(), vec![DriverRequest::SessionRecreate]);
    }
}
