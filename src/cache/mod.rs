//! Memory, disk and network tiers for downloaded byte payloads.
//!
//! [`TieredCache`] answers a lookup from the first tier that has the key:
//! memory, then disk (promoting the value into memory), then the network
//! through an injected [`Fetcher`]. Values fetched from the network are
//! written through to both lower tiers.
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

mod digest;
mod disk;
mod fetch;
mod loader;
mod memory;
mod tiered;

pub use self::digest::disk_key;
pub use self::disk::DiskTier;
#[cfg(feature = "http")]
pub use self::fetch::HttpFetcher;
pub use self::fetch::{read_body, FetchError, Fetcher};
pub use self::loader::Loader;
pub use self::memory::MemoryTier;
pub use self::tiered::{SharedCache, TieredCache};

/// Errors raised inside a single tier.
///
/// These never reach callers of [`TieredCache::lookup`]; the cache logs them
/// and falls through to the next tier.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("store has version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("refusing to store an empty value")]
    EmptyValue,
}

/// The tier a value was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Memory,
    Disk,
    Network,
}

/// Why a lookup produced no value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The key was empty
    InvalidKey,
    /// Every fetch attempt failed
    Network,
}

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(Arc<[u8]>, Tier),
    /// No tier had the key and the network returned nothing
    Miss,
    Error(ErrorKind),
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(..))
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            Lookup::Hit(_, tier) => Some(*tier),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Arc<[u8]>> {
        match self {
            Lookup::Hit(bytes, _) => Some(bytes),
            _ => None,
        }
    }
}

const MIB: usize = 1024 * 1024;

/// Cache configuration.
///
/// ```
/// use std::time::Duration;
/// use gifcache::CacheConfig;
///
/// let config = CacheConfig::new()
///     .memory_capacity(1 << 20)
///     .max_retries(5)
///     .retry_backoff(Duration::from_millis(200));
/// assert_eq!(config.disk_capacity, 50 << 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Byte ceiling of the memory tier
    pub memory_capacity: usize,
    /// Byte ceiling of the disk tier
    pub disk_capacity: u64,
    /// Directory of the disk tier, `None` keeps the cache in memory only
    pub disk_dir: Option<PathBuf>,
    /// Schema version of the disk tier; a different version wipes the store
    pub app_version: u32,
    /// Number of fetch attempts before a lookup gives up
    pub max_retries: u32,
    /// Pause between two fetch attempts
    pub retry_backoff: Duration,
    /// Worker threads of a [`Loader`]
    pub max_concurrency: usize,
    /// Outstanding [`Loader`] tasks before `submit` blocks
    pub queue_capacity: usize,
    /// Initial body buffer when the content length is unknown
    pub default_buffer_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            memory_capacity: 10 * MIB,
            disk_capacity: 50 * MIB as u64,
            disk_dir: None,
            app_version: 1,
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            max_concurrency: 10,
            queue_capacity: 64,
            default_buffer_size: 64 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory_capacity(mut self, bytes: usize) -> Self {
        self.memory_capacity = bytes;
        self
    }

    pub fn disk_capacity(mut self, bytes: u64) -> Self {
        self.disk_capacity = bytes;
        self
    }

    pub fn disk_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk_dir = Some(dir.into());
        self
    }

    pub fn app_version(mut self, version: u32) -> Self {
        self.app_version = version;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn max_concurrency(mut self, workers: usize) -> Self {
        self.max_concurrency = workers;
        self
    }

    pub fn queue_capacity(mut self, tasks: usize) -> Self {
        self.queue_capacity = tasks;
        self
    }

    pub fn default_buffer_size(mut self, bytes: usize) -> Self {
        self.default_buffer_size = bytes;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.memory_capacity, 10 * 1024 * 1024);
        assert_eq!(config.disk_capacity, 50 * 1024 * 1024);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_secs(1));
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.default_buffer_size, 64 * 1024);
        assert!(config.disk_dir.is_none());
    }

    #[test]
    fn lookup_accessors() {
        let hit = Lookup::Hit(Arc::from(&b"abc"[..]), Tier::Disk);
        assert!(hit.is_hit());
        assert_eq!(hit.tier(), Some(Tier::Disk));
        assert_eq!(hit.into_bytes().as_deref(), Some(&b"abc"[..]));
        assert_eq!(Lookup::Error(ErrorKind::Network).into_bytes(), None);
    }
}
