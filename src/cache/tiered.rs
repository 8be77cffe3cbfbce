use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::thread;

use log::{debug, info, trace, warn};
use parking_lot::{Condvar, Mutex};

use super::disk::DiskTier;
use super::fetch::{FetchError, Fetcher};
use super::memory::MemoryTier;
use super::{CacheConfig, ErrorKind, Lookup, Tier};

/// A network fetch other lookups of the same key wait on
struct InFlight {
    result: Mutex<Option<Lookup>>,
    cv: Condvar,
}

impl InFlight {
    fn new() -> Self {
        InFlight {
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn set(&self, result: Lookup) {
        *self.result.lock() = Some(result);
        self.cv.notify_all();
    }

    fn wait(&self) -> Lookup {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.cv.wait(&mut slot);
        }
    }
}

/// Publishes the fetch result to waiters, also when the fetcher panics.
struct Pending<'a> {
    cache: &'a TieredCache,
    key: &'a str,
    flight: Arc<InFlight>,
    done: bool,
}

impl Pending<'_> {
    fn finish(mut self, result: Lookup) -> Lookup {
        self.done = true;
        self.cache.finish_inflight(self.key, &self.flight, result.clone());
        result
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cache
                .finish_inflight(self.key, &self.flight, Lookup::Error(ErrorKind::Network));
        }
    }
}

/// Memory, disk and network behind a single lookup.
///
/// All methods take `&self`; share the cache between threads with an `Arc`.
pub struct TieredCache {
    config: CacheConfig,
    memory: MemoryTier,
    disk: Option<DiskTier>,
    fetcher: Arc<dyn Fetcher>,
    in_flight: Mutex<HashMap<String, Arc<InFlight>>>,
}

impl TieredCache {
    /// Builds the tiers described by `config`.
    ///
    /// If the disk tier cannot be opened the cache works from memory only.
    pub fn new(config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> TieredCache {
        let disk = config.disk_dir.as_ref().and_then(|dir| {
            match DiskTier::open(dir, config.app_version, config.disk_capacity) {
                Ok(disk) => Some(disk),
                Err(err) => {
                    warn!("disk cache at {:?} unavailable, using memory only: {}", dir, err);
                    None
                }
            }
        });
        TieredCache {
            memory: MemoryTier::new(config.memory_capacity),
            disk,
            fetcher,
            in_flight: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn with_fetcher<F: Fetcher + 'static>(config: CacheConfig, fetcher: F) -> TieredCache {
        TieredCache::new(config, Arc::new(fetcher))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    /// The disk tier, `None` when running from memory only
    pub fn disk(&self) -> Option<&DiskTier> {
        self.disk.as_ref()
    }

    /// Returns the value for `key` or `None` on a miss.
    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        self.lookup(key).into_bytes()
    }

    /// Looks `key` up in memory, then on disk, then on the network.
    ///
    /// Concurrent lookups of a key that is being fetched wait for that fetch
    /// instead of starting their own.
    pub fn lookup(&self, key: &str) -> Lookup {
        if key.is_empty() {
            return Lookup::Error(ErrorKind::InvalidKey);
        }
        if let Some(hit) = self.cached(key) {
            return hit;
        }

        let (flight, owner) = self.join_inflight(key);
        if !owner {
            trace!("waiting for running fetch of {}", key);
            return flight.wait();
        }
        let pending = Pending {
            cache: self,
            key,
            flight,
            done: false,
        };
        // the previous owner may have filled the tiers in the meantime
        let result = match self.cached(key) {
            Some(hit) => hit,
            None => self.fetch(key),
        };
        pending.finish(result)
    }

    /// Stores `value` in both tiers.
    pub fn put(&self, key: &str, value: impl Into<Arc<[u8]>>) {
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            debug!("ignoring put with empty key or value");
            return;
        }
        self.store(key, value);
    }

    pub fn contains_in_memory(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    pub fn contains_on_disk(&self, key: &str) -> bool {
        self.disk.as_ref().map_or(false, |disk| disk.contains(key))
    }

    /// Drops `key` from both tiers.
    pub fn remove(&self, key: &str) {
        self.memory.remove(key);
        if let Some(disk) = &self.disk {
            if let Err(err) = disk.remove(key) {
                warn!("cannot remove {} from disk: {}", key, err);
            }
        }
    }

    /// Drops every key starting with `prefix` from both tiers.
    pub fn remove_with_prefix(&self, prefix: &str) -> usize {
        let mut removed = self.memory.remove_with_prefix(prefix);
        if let Some(disk) = &self.disk {
            match disk.remove_with_prefix(prefix) {
                Ok(n) => removed = removed.max(n),
                Err(err) => warn!("cannot remove {}* from disk: {}", prefix, err),
            }
        }
        removed
    }

    pub fn clear(&self) {
        self.memory.clear();
        if let Some(disk) = &self.disk {
            if let Err(err) = disk.clear() {
                warn!("cannot clear disk cache: {}", err);
            }
        }
    }

    fn cached(&self, key: &str) -> Option<Lookup> {
        if let Some(value) = self.memory.get(key) {
            trace!("memory hit for {}", key);
            return Some(Lookup::Hit(value, Tier::Memory));
        }
        let disk = self.disk.as_ref()?;
        match disk.get(key) {
            Ok(Some(data)) => {
                trace!("disk hit for {}", key);
                let value: Arc<[u8]> = data.into();
                self.memory.put(key, Arc::clone(&value));
                Some(Lookup::Hit(value, Tier::Disk))
            }
            Ok(None) => None,
            Err(err) => {
                warn!("disk read of {} failed: {}", key, err);
                None
            }
        }
    }

    fn fetch(&self, key: &str) -> Lookup {
        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            match self.fetcher.fetch(key) {
                Ok(data) if !data.is_empty() => {
                    debug!("fetched {} bytes for {}", data.len(), key);
                    let value: Arc<[u8]> = data.into();
                    self.store(key, Arc::clone(&value));
                    return Lookup::Hit(value, Tier::Network);
                }
                Ok(_) | Err(FetchError::Empty) => {
                    debug!("empty payload for {}", key);
                    return Lookup::Miss;
                }
                Err(err) => {
                    warn!("fetch {}/{} of {} failed: {}", attempt, attempts, key, err);
                    if attempt < attempts {
                        thread::sleep(self.config.retry_backoff);
                    }
                }
            }
        }
        Lookup::Error(ErrorKind::Network)
    }

    fn store(&self, key: &str, value: Arc<[u8]>) {
        if let Some(disk) = &self.disk {
            if let Err(err) = disk.put(key, &value) {
                warn!("disk write of {} discarded: {}", key, err);
            }
        }
        self.memory.put(key, value);
    }

    fn join_inflight(&self, key: &str) -> (Arc<InFlight>, bool) {
        let mut map = self.in_flight.lock();
        if let Some(existing) = map.get(key) {
            return (Arc::clone(existing), false);
        }
        let flight = Arc::new(InFlight::new());
        map.insert(key.to_string(), Arc::clone(&flight));
        (flight, true)
    }

    fn finish_inflight(&self, key: &str, flight: &Arc<InFlight>, result: Lookup) {
        flight.set(result);
        self.in_flight.lock().remove(key);
    }
}

/// Caller-owned slot that builds its [`TieredCache`] exactly once.
#[derive(Default)]
pub struct SharedCache {
    cell: OnceLock<Arc<TieredCache>>,
}

impl SharedCache {
    pub const fn new() -> SharedCache {
        SharedCache {
            cell: OnceLock::new(),
        }
    }

    /// Builds the cache on the first call; later calls ignore their
    /// arguments and return the same instance.
    pub fn init(&self, config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> Arc<TieredCache> {
        Arc::clone(self.cell.get_or_init(|| {
            info!("initializing image cache");
            Arc::new(TieredCache::new(config, fetcher))
        }))
    }

    pub fn get(&self) -> Option<Arc<TieredCache>> {
        self.cell.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}
