//! Drops tracked records nobody has seen for a while.
//!
//! Reconciliation never removes records, so without this sweep every
//! collection would grow forever.

use chrono::{DateTime, Utc};
use sentinel_protocol::TrackedRecord;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::store::RecordStore;

pub struct RetentionSweep {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    collections: Vec<String>,
    max_age: Duration,
}

impl RetentionSweep {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        collections: Vec<String>,
        max_age: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            collections,
            max_age,
        }
    }

    /// Sweeps every collection; a failing collection does not stop the rest.
    /// Returns the number of records dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut dropped = 0;
        for collection in &self.collections {
            match self.sweep_collection(collection, now) {
                Ok(count) => dropped += count,
                Err(err) => {
                    warn!(collection = %collection, error = %err, "Retention sweep failed")
                }
            }
        }
        dropped
    }

    fn sweep_collection(&self, collection: &str, now: DateTime<Utc>) -> Result<usize> {
        let records = self.store.load(collection)?;
        let before = records.len();
        let kept: Vec<TrackedRecord> = records
            .into_iter()
            .filter(|record| self.is_fresh(record, now))
            .collect();

        let dropped = before - kept.len();
        if dropped > 0 {
            self.store.save(collection, &kept)?;
            info!(collection = %collection, dropped, kept = kept.len(), "Expired records removed");
        }
        Ok(dropped)
    }

    fn is_fresh(&self, record: &TrackedRecord, now: DateTime<Utc>) -> bool {
        let Some(last_seen_at) = record.metadata.last_seen_at else {
            return false;
        };
        match now.signed_duration_since(last_seen_at).to_std() {
            Ok(age) => age <= self.max_age,
            // Seen "in the future": clock moved back, keep it.
            Err(_) => true,
        }
    }
}
