//! Record storage: authoritative local records and the sampled db cache

use parking_lot::RwLock;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use whanau_core::{sort_records, Key, Record, Value};

/// Records held by one node
#[derive(Default)]
pub struct RecordStore {
    /// Records this node is authoritative for
    local: RwLock<BTreeMap<Key, Value>>,
    /// Records sampled from the network, sorted by key
    db: RwLock<Arc<Vec<Record>>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an authoritative record, returning the value it replaced
    pub fn insert_local(&self, key: Key, value: Value) -> Option<Value> {
        self.local.write().insert(key, value)
    }

    pub fn remove_local(&self, key: &Key) -> Option<Value> {
        self.local.write().remove(key)
    }

    /// Snapshot of the local records in key order
    pub fn local_records(&self) -> Vec<Record> {
        self.local
            .read()
            .iter()
            .map(|(key, value)| Record::new(key.clone(), value.clone()))
            .collect()
    }

    pub fn local_len(&self) -> usize {
        self.local.read().len()
    }

    /// Pick one local record uniformly at random
    pub fn sample_local<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Record> {
        let local = self.local.read();
        if local.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..local.len());
        local
            .iter()
            .nth(index)
            .map(|(key, value)| Record::new(key.clone(), value.clone()))
    }

    /// Replace the db wholesale with a fresh sample
    pub fn replace_db(&self, mut records: Vec<Record>) {
        sort_records(&mut records);
        *self.db.write() = Arc::new(records);
    }

    /// Current db snapshot, sorted by key
    pub fn db(&self) -> Arc<Vec<Record>> {
        self.db.read().clone()
    }

    /// The first `count` db records at or after `key`, wrapping around the
    /// end of the key space. Never returns more records than the db holds.
    pub fn successors_of(&self, key: &Key, count: usize) -> Vec<Record> {
        let db = self.db();
        if db.is_empty() {
            return Vec::new();
        }
        let start = db.partition_point(|record| record.key < *key);
        db.iter()
            .cycle()
            .skip(start)
            .take(count.min(db.len()))
            .cloned()
            .collect()
    }
}
