use std::collections::HashMap;
use std::sync::RwLock;

use rand::seq::IteratorRandom;
use rand::Rng;

use crate::database::entity::DataEntity;

/// Visitor passed to `Dict::for_each`; return `false` to stop iterating early.
pub type Consumer<'a> = dyn FnMut(&str, &DataEntity) -> bool + 'a;

/// Concurrency-safe string-keyed map from a key to its `DataEntity`.
///
/// Backed by a single `RwLock<HashMap<..>>` (the lock-based variant of §4.5):
/// reads (`get`, `len`, iteration) take a shared lock, mutations take an
/// exclusive one. `PutIfAbsent`/`PutIfExists` are not atomic with a concurrent
/// `Put` targeting the same key across two separate lock acquisitions would be;
/// within a single call they hold the lock for their whole check-then-act, which
/// is the best this single-mutex design offers and is the documented limitation
/// the capability set accepts.
pub struct Dict {
    inner: RwLock<HashMap<String, DataEntity>>,
}

impl Dict {
    pub fn new() -> Self {
        Dict {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<DataEntity> {
        self.inner.read().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upsert. Returns 1 if the key was newly inserted, 0 if it replaced an
    /// existing value.
    pub fn put(&self, key: impl Into<String>, val: DataEntity) -> i64 {
        let mut map = self.inner.write().unwrap();
        if map.insert(key.into(), val).is_some() {
            0
        } else {
            1
        }
    }

    /// Insert only if absent. Returns 1 if stored, 0 if the key already existed.
    pub fn put_if_absent(&self, key: impl Into<String>, val: DataEntity) -> i64 {
        let mut map = self.inner.write().unwrap();
        let key = key.into();
        if map.contains_key(&key) {
            0
        } else {
            map.insert(key, val);
            1
        }
    }

    /// Overwrite only if present. Returns 1 if overwritten, 0 if the key was
    /// absent.
    pub fn put_if_exists(&self, key: &str, val: DataEntity) -> i64 {
        let mut map = self.inner.write().unwrap();
        if map.contains_key(key) {
            map.insert(key.to_string(), val);
            1
        } else {
            0
        }
    }

    /// Returns 1 if a key was deleted, 0 if it was absent.
    pub fn remove(&self, key: &str) -> i64 {
        let mut map = self.inner.write().unwrap();
        if map.remove(key).is_some() {
            1
        } else {
            0
        }
    }

    /// Visit every entry; iteration order is whatever the backing map gives and
    /// offers no snapshot guarantee against concurrent writers. Stop early if
    /// `consumer` returns `false`.
    pub fn for_each(&self, mut consumer: impl FnMut(&str, &DataEntity) -> bool) {
        let map = self.inner.read().unwrap();
        for (k, v) in map.iter() {
            if !consumer(k, v) {
                break;
            }
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().unwrap().keys().cloned().collect()
    }

    /// `limit` keys chosen with replacement; may repeat. Empty dict yields an
    /// empty vec regardless of `limit`.
    pub fn random_keys(&self, limit: usize) -> Vec<String> {
        let map = self.inner.read().unwrap();
        if map.is_empty() || limit == 0 {
            return Vec::new();
        }
        let keys: Vec<&String> = map.keys().collect();
        let mut rng = rand::thread_rng();
        (0..limit)
            .map(|_| keys[rng.gen_range(0..keys.len())].clone())
            .collect()
    }

    /// Up to `limit` distinct keys, chosen without replacement; returns fewer
    /// than `limit` if the dict has fewer keys.
    pub fn random_distinct_keys(&self, limit: usize) -> Vec<String> {
        let map = self.inner.read().unwrap();
        let mut rng = rand::thread_rng();
        map.keys().cloned().choose_multiple(&mut rng, limit)
    }

    pub fn clear(&self) {
        self.inner.write().unwrap().clear();
    }
}

impl Default for Dict {
    fn default() -> Self {
        Dict::new()
    }
}
