//! Merges a freshly observed batch into a stored collection.
//!
//! Pure function: no storage, no alerts. The engine persists `updated` and
//! announces `arrived`.
//!
//! Records missing from the batch are kept untouched. Pages load partially
//! often enough that absence is not evidence of removal; expiry belongs to
//! the retention sweep.

use chrono::{DateTime, Utc};
use sentinel_protocol::{ObservedRecord, RecordMetadata, TrackedRecord};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Full snapshot, oldest `last_seen_at` first.
    pub updated: Vec<TrackedRecord>,
    /// Records whose key was never seen before, in batch order.
    pub arrived: Vec<TrackedRecord>,
}

pub fn reconcile(
    stored: Vec<TrackedRecord>,
    observed: &[ObservedRecord],
    now: DateTime<Utc>,
) -> Reconciliation {
    let mut records: Vec<TrackedRecord> = Vec::with_capacity(stored.len() + observed.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(stored.len());

    for record in stored {
        if index.contains_key(&record.key) {
            warn!(key = %record.key, "Duplicate key in stored collection; keeping first");
            continue;
        }
        index.insert(record.key.clone(), records.len());
        records.push(record);
    }

    let mut arrived = Vec::new();
    for candidate in observed {
        match index.get(&candidate.key) {
            Some(&position) => {
                let metadata = &mut records[position].metadata;
                metadata.last_seen_at = Some(now);
                if metadata.first_seen_at.is_none() {
                    metadata.first_seen_at = Some(now);
                }
            }
            None => {
                let record = TrackedRecord {
                    key: candidate.key.clone(),
                    fields: candidate.fields.clone(),
                    metadata: RecordMetadata {
                        first_seen_at: Some(now),
                        last_seen_at: Some(now),
                    },
                };
                index.insert(record.key.clone(), records.len());
                arrived.push(record.clone());
                records.push(record);
            }
        }
    }

    // Stable sort: equal timestamps keep stored-then-arrival order.
    records.sort_by_key(|record| record.metadata.last_seen_at);

    Reconciliation {
        updated: records,
        arrived,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::{json, Map, Value};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn observed(key: &str) -> ObservedRecord {
        let mut fields = Map::new();
        fields.insert("market".to_string(), Value::String(format!("market-{key}")));
        ObservedRecord::new(key, fields)
    }

    fn stored(key: &str, first: Option<i64>, last: Option<i64>) -> TrackedRecord {
        TrackedRecord {
            key: key.to_string(),
            fields: Map::new(),
            metadata: RecordMetadata {
                first_seen_at: first.map(t),
                last_seen_at: last.map(t),
            },
        }
    }

    #[test]
    fn first_observation_sets_both_timestamps() {
        let result = reconcile(Vec::new(), &[observed("a")], t(1));

        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].metadata.first_seen_at, Some(t(1)));
        assert_eq!(result.updated[0].metadata.last_seen_at, Some(t(1)));
        assert_eq!(result.arrived.len(), 1);
        assert_eq!(
            result.updated[0].fields.get("market"),
            Some(&json!("market-a"))
        );
    }

    #[test]
    fn repeat_observation_only_moves_last_seen() {
        let first = reconcile(Vec::new(), &[observed("a")], t(1));
        let second = reconcile(first.updated, &[observed("a")], t(2));

        assert!(second.arrived.is_empty());
        assert_eq!(second.updated[0].metadata.first_seen_at, Some(t(1)));
        assert_eq!(second.updated[0].metadata.last_seen_at, Some(t(2)));
    }

    #[test]
    fn same_batch_same_instant_is_idempotent() {
        let once = reconcile(Vec::new(), &[observed("a"), observed("b")], t(3));
        let twice = reconcile(once.updated.clone(), &[observed("a"), observed("b")], t(3));

        assert_eq!(once.updated, twice.updated);
        assert!(twice.arrived.is_empty());
    }

    #[test]
    fn reports_only_unknown_keys_as_arrived() {
        let result = reconcile(
            vec![stored("a", Some(0), Some(0))],
            &[observed("a"), observed("b")],
            t(5),
        );

        let arrived: Vec<_> = result.arrived.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(arrived, vec!["b"]);
        assert_eq!(result.updated.len(), 2);
    }

    #[test]
    fn absent_records_are_kept() {
        let result = reconcile(
            vec![stored("gone", Some(0), Some(0)), stored("a", Some(0), Some(1))],
            &[observed("a")],
            t(5),
        );

        let keys: Vec<_> = result.updated.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["gone", "a"]);
        assert_eq!(result.updated[0].metadata.last_seen_at, Some(t(0)));
    }

    #[test]
    fn heals_missing_first_seen() {
        let result = reconcile(vec![stored("a", None, None)], &[observed("a")], t(4));

        assert!(result.arrived.is_empty());
        assert_eq!(result.updated[0].metadata.first_seen_at, Some(t(4)));
        assert_eq!(result.updated[0].metadata.last_seen_at, Some(t(4)));
    }

    #[test]
    fn output_is_sorted_by_last_seen_with_stable_ties() {
        let result = reconcile(
            vec![
                stored("late", Some(0), Some(9)),
                stored("untouched", None, None),
                stored("early", Some(0), Some(2)),
                stored("seen-now", Some(0), Some(1)),
            ],
            &[observed("seen-now"), observed("new-1"), observed("new-2")],
            t(5),
        );

        let keys: Vec<_> = result.updated.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["untouched", "early", "seen-now", "new-1", "new-2", "late"]
        );
        for pair in result.updated.windows(2) {
            assert!(pair[0].metadata.last_seen_at <= pair[1].metadata.last_seen_at);
        }
    }

    #[test]
    fn duplicate_stored_keys_collapse_to_first() {
        let result = reconcile(
            vec![stored("a", Some(0), Some(0)), stored("a", Some(1), Some(1))],
            &[],
            t(2),
        );
        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].metadata.first_seen_at, Some(t(0)));
    }
}
