//! A small TTL cache with explicit invalidation.
//!
//! Instances are owned by the collaborators that use them (prompt library,
//! context builder) and injected at construction; there is no process-wide
//! cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Key/value cache where every entry expires `ttl` after insertion.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return a clone of the live entry for `key`. Expired entries are
    /// evicted on access.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.lock().insert(key, (Instant::now(), value));
    }

    /// Drop one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn invalidate_all(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, (Instant, V)>> {
        // A poisoned map is still structurally valid.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_then_invalidate() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("strategy", 1);
        assert_eq!(cache.get(&"strategy"), Some(1));
        assert!(cache.invalidate(&"strategy"));
        assert_eq!(cache.get(&"strategy"), None);
        assert!(!cache.invalidate(&"strategy"));
    }

    #[test]
    fn zero_ttl_never_hits() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert(1u8, "x".to_string());
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty(), "expired entry is evicted on read");
    }

    #[test]
    fn invalidate_all_clears() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, 'a');
        cache.insert(2, 'b');
        assert_eq!(cache.len(), 2);
        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
