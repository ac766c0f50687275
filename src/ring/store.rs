//! Two-level in-memory data store local to one node.
//!
//! A `chord_key` places a bucket of data on the ring; within a bucket,
//! values accumulate per `data_key` as an ordered, duplicate-preserving
//! list. Buckets migrate between nodes as ring ownership changes.

use std::collections::HashMap;

use crate::ring::ident::NodeId;

/// Ring coordinate of a bucket (same space as node ids).
pub type ChordKey = NodeId;

/// Application-level sub-index within a bucket.
pub type DataKey = String;

/// Stored value; opaque to the ring.
pub type Value = String;

/// One bucket: data keys to their accumulated values.
pub type Bucket = HashMap<DataKey, Vec<Value>>;

/// The node-local key-value store.
#[derive(Debug, Clone, Default)]
pub struct DataStore {
    buckets: HashMap<ChordKey, Bucket>,
}

impl DataStore {
    pub fn new() -> Self {
        DataStore {
            buckets: HashMap::new(),
        }
    }

    /// Appends a value under `(chord_key, data_key)`, preserving order and
    /// duplicates.
    pub fn append(&mut self, chord_key: ChordKey, data_key: DataKey, value: Value) {
        self.buckets
            .entry(chord_key)
            .or_default()
            .entry(data_key)
            .or_default()
            .push(value);
    }

    /// Returns a copy of the values under `(chord_key, data_key)`; missing
    /// entries read as an empty list.
    pub fn get(&self, chord_key: ChordKey, data_key: &str) -> Vec<Value> {
        self.buckets
            .get(&chord_key)
            .and_then(|bucket| bucket.get(data_key))
            .cloned()
            .unwrap_or_default()
    }

    /// All chord keys currently holding data.
    pub fn chord_keys(&self) -> Vec<ChordKey> {
        self.buckets.keys().cloned().collect()
    }

    /// Copies out a whole bucket (for ownership handoff).
    pub fn bucket(&self, chord_key: ChordKey) -> Option<Bucket> {
        self.buckets.get(&chord_key).cloned()
    }

    /// Removes the first occurrence of `value` under `(chord_key, data_key)`
    /// after it has been delivered elsewhere; prunes empty levels. Returns
    /// true if a value was removed.
    pub fn remove_first(
        &mut self,
        chord_key: ChordKey,
        data_key: &str,
        value: &str,
    ) -> bool {
        let Some(bucket) = self.buckets.get_mut(&chord_key) else {
            return false;
        };
        let Some(values) = bucket.get_mut(data_key) else {
            return false;
        };
        let Some(pos) = values.iter().position(|v| v == value) else {
            return false;
        };
        values.remove(pos);
        if values.is_empty() {
            bucket.remove(data_key);
        }
        if bucket.is_empty() {
            self.buckets.remove(&chord_key);
        }
        true
    }

    /// Number of buckets held.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod store_tests {
    use super::*;

    #[test]
    fn append_preserves_order_and_dups() {
        let mut store = DataStore::new();
        store.append(4, "a".into(), "x".into());
        store.append(4, "a".into(), "y".into());
        store.append(4, "a".into(), "x".into());
        assert_eq!(store.get(4, "a"), vec!["x", "y", "x"]);
    }

    #[test]
    fn get_missing_is_empty() {
        let store = DataStore::new();
        assert!(store.get(4, "a").is_empty());
        let mut store = store;
        store.append(4, "a".into(), "x".into());
        assert!(store.get(4, "b").is_empty());
        assert!(store.get(5, "a").is_empty());
    }

    #[test]
    fn remove_first_prunes_levels() {
        let mut store = DataStore::new();
        store.append(4, "a".into(), "x".into());
        store.append(4, "a".into(), "x".into());
        assert!(store.remove_first(4, "a", "x"));
        assert_eq!(store.get(4, "a"), vec!["x"]);
        assert!(store.remove_first(4, "a", "x"));
        assert!(store.is_empty());
        assert!(!store.remove_first(4, "a", "x"));
    }

    #[test]
    fn bucket_copy_is_detached() {
        let mut store = DataStore::new();
        store.append(4, "a".into(), "x".into());
        let copied = store.bucket(4).unwrap();
        store.append(4, "a".into(), "y".into());
        assert_eq!(copied["a"], vec!["x"]);
        assert_eq!(store.chord_keys(), vec![4]);
    }
}
