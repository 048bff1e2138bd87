//! Epoch-guarded in-memory map.
//!
//! `clear` bumps the epoch. A caller that read the epoch before an await and
//! inserts afterwards is refused if a clear happened in between, so work
//! started under an old identity never lands in the cache after a change.
//! The lock is never held across an await.

use std::collections::HashMap;

use parking_lot::Mutex;

struct Inner<V> {
    epoch: u64,
    entries: HashMap<String, V>,
}

pub struct EpochCache<V> {
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> EpochCache<V> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { epoch: 0, entries: HashMap::new() }) }
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Insert unless the cache was cleared since `epoch`. Returns whether it was stored.
    pub fn insert_if_current(&self, epoch: u64, key: &str, value: V) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return false;
        }
        inner.entries.insert(key.to_string(), value);
        true
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for EpochCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
