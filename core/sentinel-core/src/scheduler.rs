//! Single-flight job scheduler for the shared session.
//!
//! Every operation that touches the monitored session goes through here. One
//! worker thread drains an mpsc channel, so operations run strictly one at a
//! time and in submission order, whichever producer submitted them.
//!
//! There is deliberately no per-job timeout: cancelling a session operation
//! half way can leave the remote session in an unknown state. Operations own
//! their timeouts.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SentinelError};
use crate::sync::lock;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct SchedulerStats {
    queued: AtomicUsize,
    busy: AtomicBool,
    completed: AtomicU64,
}

pub struct JobScheduler {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<SchedulerStats>,
}

/// Completion handle for a submitted operation.
///
/// Dropping the handle does not cancel the job.
pub struct JobHandle<T> {
    label: String,
    receiver: Receiver<std::result::Result<T, ()>>,
}

impl<T> JobHandle<T> {
    /// Blocks until the job has run.
    ///
    /// Never call this from inside a scheduled job: the worker would wait on
    /// itself.
    pub fn wait(self) -> Result<T> {
        match self.receiver.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(())) => Err(SentinelError::JobPanicked { label: self.label }),
            Err(_) => Err(SentinelError::SchedulerStopped { label: self.label }),
        }
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(())) => Err(SentinelError::JobPanicked { label: self.label }),
            Err(RecvTimeoutError::Timeout) => {
                Err(SentinelError::JobWaitTimedOut { label: self.label })
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(SentinelError::SchedulerStopped { label: self.label })
            }
        }
    }
}

impl JobScheduler {
    pub fn start() -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let stats = Arc::new(SchedulerStats::default());
        let worker_stats = Arc::clone(&stats);

        let worker = thread::Builder::new()
            .name("sentinel-scheduler".to_string())
            .spawn(move || {
                for job in receiver {
                    worker_stats.busy.store(true, Ordering::SeqCst);
                    job();
                    worker_stats.busy.store(false, Ordering::SeqCst);
                    worker_stats.queued.fetch_sub(1, Ordering::SeqCst);
                    worker_stats.completed.fetch_add(1, Ordering::SeqCst);
                }
                debug!("Scheduler worker drained and stopped");
            })
            .map_err(|source| SentinelError::Io {
                context: "spawn scheduler worker".to_string(),
                source,
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            stats,
        })
    }

    /// Queues `operation` behind everything already submitted.
    pub fn submit<T, F>(&self, label: &str, operation: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel();
        let job_label = label.to_string();
        let job: Job = Box::new(move || {
            debug!(job = %job_label, "Job started");
            let outcome = catch_unwind(AssertUnwindSafe(operation)).map_err(|_| {
                error!(job = %job_label, "Job panicked");
            });
            // The submitter may have dropped its handle.
            let _ = done_tx.send(outcome);
        });

        let sender = lock(&self.sender);
        match sender.as_ref() {
            Some(sender) => {
                self.stats.queued.fetch_add(1, Ordering::SeqCst);
                if sender.send(job).is_err() {
                    self.stats.queued.fetch_sub(1, Ordering::SeqCst);
                    warn!(job = %label, "Scheduler worker gone; job dropped");
                }
            }
            None => {
                warn!(job = %label, "Scheduler stopped; job rejected");
            }
        }

        JobHandle {
            label: label.to_string(),
            receiver: done_rx,
        }
    }

    /// Jobs submitted but not yet finished, including the running one.
    pub fn queued(&self) -> usize {
        self.stats.queued.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.stats.busy.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.stats.completed.load(Ordering::SeqCst)
    }

    /// Stops accepting jobs, lets the worker drain what is queued, and joins it.
    pub fn shutdown(&self) {
        let sender = lock(&self.sender).take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        if let Some(worker) = lock(&self.worker).take() {
            if worker.thread().id() == thread::current().id() {
                warn!("Scheduler shutdown requested from its own worker; not joining");
                return;
            }
            if worker.join().is_err() {
                error!("Scheduler worker panicked during shutdown");
            }
        }
        info!(completed = self.completed(), "Scheduler stopped");
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
