use std::sync::Arc;

use log::trace;
use lru::LruCache;
use parking_lot::Mutex;

struct Inner {
    entries: LruCache<String, Arc<[u8]>>,
    size: usize,
}

/// Byte-bounded in-process store.
///
/// Tracks the summed length of all values and drops least recently used
/// entries once `capacity` is exceeded.
pub struct MemoryTier {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> MemoryTier {
        MemoryTier {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                size: 0,
            }),
            capacity,
        }
    }

    /// Returns the value and marks it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Checks for a key without touching its recency.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Stores a value, evicting older entries as needed.
    ///
    /// Returns `false` if the value alone exceeds the capacity; it is not
    /// cached then and any previous value for the key is dropped.
    pub fn put(&self, key: &str, value: Arc<[u8]>) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if value.len() > self.capacity {
            if let Some(old) = inner.entries.pop(key) {
                inner.size -= old.len();
            }
            trace!("{} bytes for {} exceed the memory tier", value.len(), key);
            return false;
        }
        inner.size += value.len();
        if let Some(old) = inner.entries.put(key.to_string(), value) {
            inner.size -= old.len();
        }
        while inner.size > self.capacity {
            match inner.entries.pop_lru() {
                Some((evicted, old)) => {
                    inner.size -= old.len();
                    trace!("evicted {} ({} bytes) from memory", evicted, old.len());
                }
                None => break,
            }
        }
        true
    }

    pub fn remove(&self, key: &str) -> Option<Arc<[u8]>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let old = inner.entries.pop(key)?;
        inner.size -= old.len();
        Some(old)
    }

    /// Removes every key starting with `prefix` and returns how many were dropped.
    pub fn remove_with_prefix(&self, prefix: &str) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            if let Some(old) = inner.entries.pop(key.as_str()) {
                inner.size -= old.len();
            }
        }
        keys.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.size = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed length of all stored values
    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::MemoryTier;

    fn bytes(n: usize) -> Arc<[u8]> {
        vec![7; n].into()
    }

    #[test]
    fn evicts_least_recently_used() {
        let tier = MemoryTier::new(10);
        tier.put("a", bytes(4));
        tier.put("b", bytes(4));
        assert!(tier.get("a").is_some());
        tier.put("c", bytes(4));
        assert!(tier.contains("a"));
        assert!(!tier.contains("b"));
        assert!(tier.contains("c"));
        assert_eq!(tier.size(), 8);
    }

    #[test]
    fn replacing_updates_size() {
        let tier = MemoryTier::new(100);
        tier.put("a", bytes(40));
        tier.put("a", bytes(10));
        assert_eq!(tier.size(), 10);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.remove("a").map(|v| v.len()), Some(10));
        assert_eq!(tier.size(), 0);
    }

    #[test]
    fn oversized_value_is_not_cached() {
        let tier = MemoryTier::new(10);
        tier.put("a", bytes(5));
        assert!(!tier.put("a", bytes(11)));
        assert!(!tier.contains("a"));
        assert_eq!(tier.size(), 0);
    }

    #[test]
    fn prefix_removal() {
        let tier = MemoryTier::new(100);
        tier.put("http://a/1", bytes(1));
        tier.put("http://a/2", bytes(1));
        tier.put("http://b/1", bytes(1));
        assert_eq!(tier.remove_with_prefix("http://a/"), 2);
        assert_eq!(tier.len(), 1);
        assert!(tier.contains("http://b/1"));
        tier.clear();
        assert!(tier.is_empty());
    }
}
