//! Persistence seam for tracked collections.
//!
//! Each `save` replaces a whole collection snapshot. Readers never observe a
//! half-written collection.

use sentinel_protocol::TrackedRecord;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::sync::lock;

pub trait RecordStore: Send + Sync {
    /// Returns the stored snapshot, or an empty list for an unknown collection.
    fn load(&self, collection: &str) -> Result<Vec<TrackedRecord>>;
    fn save(&self, collection: &str, records: &[TrackedRecord]) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<TrackedRecord>>>,
}

impl MemoryStore {
    pub fn with_collection(collection: &str, records: Vec<TrackedRecord>) -> Self {
        let store = Self::default();
        lock(&store.collections).insert(collection.to_string(), records);
        store
    }
}

impl RecordStore for MemoryStore {
    fn load(&self, collection: &str) -> Result<Vec<TrackedRecord>> {
        Ok(lock(&self.collections)
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    fn save(&self, collection: &str, records: &[TrackedRecord]) -> Result<()> {
        lock(&self.collections).insert(collection.to_string(), records.to_vec());
        Ok(())
    }
}
