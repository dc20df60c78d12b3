use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

/// Bounded map from a key to an atomic counter with approximate LRU
/// eviction. Structural changes (insert, evict, remove) take the internal
/// lock; increments on a counter handed out earlier are plain atomic adds.
///
/// Evicted keys are dropped silently together with their statistics.
pub(crate) struct LruCounterMap<K: Hash + Eq> {
    inner: Mutex<LruCache<K, Arc<AtomicI64>>>,
}

impl<K: Hash + Eq> std::fmt::Debug for LruCounterMap<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCounterMap")
            .field("len", &self.inner.lock().len())
            .finish()
    }
}

impl<K: Hash + Eq + Clone> LruCounterMap<K> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The counter for `key`, inserted at zero on first sight. Touching a key
    /// refreshes its recency.
    pub fn counter(&self, key: &K) -> Arc<AtomicI64> {
        let mut map = self.inner.lock();
        if let Some(counter) = map.get(key) {
            return Arc::clone(counter);
        }
        let counter = Arc::new(AtomicI64::new(0));
        map.put(key.clone(), Arc::clone(&counter));
        counter
    }

    pub fn add(&self, key: &K, n: i64) {
        self.counter(key).fetch_add(n, Ordering::Relaxed);
    }

    /// Current value without refreshing recency; `None` if evicted or never
    /// seen.
    pub fn get(&self, key: &K) -> Option<i64> {
        self.inner
            .lock()
            .peek(key)
            .map(|c| c.load(Ordering::Relaxed))
    }

    /// Decrement, removing the key once its counter drops to zero or below.
    pub fn decrement_and_prune(&self, key: &K) {
        let mut map = self.inner.lock();
        if let Some(counter) = map.peek(key) {
            if counter.fetch_sub(1, Ordering::Relaxed) - 1 <= 0 {
                map.pop(key);
            }
        }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Point-in-time copy of all live (key, value) pairs.
    pub fn snapshot(&self) -> Vec<(K, i64)> {
        self.inner
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }
}
