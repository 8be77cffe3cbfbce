use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info, trace, warn};
use lru::LruCache;
use parking_lot::Mutex;
use tempfile::NamedTempFile;

use super::digest::disk_key;
use super::CacheError;

const VERSION_FILE: &str = "VERSION";
const ENTRY_EXT: &str = "entry";

struct Entry {
    len: u64,
    /// Original key, unknown for entries found on disk at open
    key: Option<String>,
}

struct Index {
    entries: LruCache<String, Entry>,
    size: u64,
}

/// Durable content-addressed store.
///
/// Each value is one file named after the digest of its key. Files are
/// staged in a temporary file and renamed into place, so an entry is
/// either complete or absent. Access order is kept in the file
/// modification times and reloaded at open.
pub struct DiskTier {
    dir: PathBuf,
    version: u32,
    capacity: u64,
    index: Mutex<Index>,
}

impl DiskTier {
    /// Opens the store in `dir`, creating it if needed.
    ///
    /// A store written with another `version` is emptied first.
    pub fn open(dir: &Path, version: u32, capacity: u64) -> Result<DiskTier, CacheError> {
        fs::create_dir_all(dir)?;
        match check_version(dir, version) {
            Ok(()) => {}
            Err(err @ CacheError::VersionMismatch { .. }) => {
                info!("wiping disk cache at {:?}: {}", dir, err);
                remove_entries(dir)?;
            }
            Err(err) => return Err(err),
        }
        fs::write(dir.join(VERSION_FILE), version.to_string())?;

        let mut found = Vec::new();
        for dirent in fs::read_dir(dir)? {
            let dirent = dirent?;
            let path = dirent.path();
            let name = dirent.file_name().to_string_lossy().into_owned();
            if name.starts_with(".tmp") {
                // staged write that was never committed
                let _ = fs::remove_file(&path);
                continue;
            }
            if path.extension().map_or(true, |ext| ext != ENTRY_EXT) {
                continue;
            }
            let meta = dirent.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let stem = match path.file_stem() {
                Some(stem) => stem.to_string_lossy().into_owned(),
                None => continue,
            };
            let touched = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((touched, stem, meta.len()));
        }
        found.sort();

        let mut index = Index {
            entries: LruCache::unbounded(),
            size: 0,
        };
        for (_, digest, len) in found {
            index.size += len;
            index.entries.put(digest, Entry { len, key: None });
        }
        debug!(
            "opened disk cache at {:?}: {} entries, {} bytes",
            dir,
            index.entries.len(),
            index.size
        );

        let tier = DiskTier {
            dir: dir.to_path_buf(),
            version,
            capacity,
            index: Mutex::new(index),
        };
        tier.evict(&mut tier.index.lock());
        Ok(tier)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Summed size of all entries in bytes
    pub fn size(&self) -> u64 {
        self.index.lock().size
    }

    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.lock().entries.contains(disk_key(key).as_str())
    }

    /// Reads the value stored for `key` and marks it recently used.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let digest = disk_key(key);
        let path = self.entry_path(&digest);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let mut guard = self.index.lock();
                let index = &mut *guard;
                // a put may have committed the file since the read
                if !path.is_file() {
                    if let Some(stale) = index.entries.pop(digest.as_str()) {
                        index.size -= stale.len;
                    }
                }
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        {
            let mut guard = self.index.lock();
            let index = &mut *guard;
            match index.entries.get_mut(digest.as_str()) {
                Some(entry) => {
                    if entry.key.is_none() {
                        entry.key = Some(key.to_string());
                    }
                }
                None => {
                    let len = data.len() as u64;
                    index.size += len;
                    index.entries.put(
                        digest,
                        Entry {
                            len,
                            key: Some(key.to_string()),
                        },
                    );
                }
            }
        }
        if let Err(err) = touch(&path) {
            trace!("cannot update access time of {:?}: {}", path, err);
        }
        Ok(Some(data))
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Nothing is committed if any step of the write fails; the staged file
    /// is deleted when it is dropped.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        if value.is_empty() {
            return Err(CacheError::EmptyValue);
        }
        let digest = disk_key(key);
        let mut staged = NamedTempFile::new_in(&self.dir)?;
        staged.write_all(value)?;
        staged.as_file().sync_all()?;

        // a committed file and its index entry change under the same lock
        let mut guard = self.index.lock();
        staged
            .persist(self.entry_path(&digest))
            .map_err(|err| err.error)?;
        let index = &mut *guard;
        let len = value.len() as u64;
        index.size += len;
        let entry = Entry {
            len,
            key: Some(key.to_string()),
        };
        if let Some(old) = index.entries.put(digest, entry) {
            index.size -= old.len;
        }
        trace!("stored {} bytes for {} on disk", len, key);
        self.evict(index);
        Ok(())
    }

    /// Removes the entry for `key`. Returns whether there was one.
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let digest = disk_key(key);
        let mut guard = self.index.lock();
        let index = &mut *guard;
        if let Some(old) = index.entries.pop(digest.as_str()) {
            index.size -= old.len;
        }
        match fs::remove_file(self.entry_path(&digest)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes all entries whose key starts with `prefix`.
    ///
    /// Only keys written or read during this session are known; entries
    /// loaded from a previous run are matched once they have been read.
    pub fn remove_with_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut guard = self.index.lock();
        let index = &mut *guard;
        let digests: Vec<String> = index
            .entries
            .iter()
            .filter(|(_, entry)| entry.key.as_deref().map_or(false, |k| k.starts_with(prefix)))
            .map(|(digest, _)| digest.clone())
            .collect();
        for digest in &digests {
            if let Some(old) = index.entries.pop(digest.as_str()) {
                index.size -= old.len;
            }
            remove_if_present(&self.entry_path(digest))?;
        }
        Ok(digests.len())
    }

    /// Deletes every entry.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut index = self.index.lock();
        index.entries.clear();
        index.size = 0;
        remove_entries(&self.dir)?;
        info!("cleared disk cache at {:?}", self.dir);
        Ok(())
    }

    fn entry_path(&self, digest: &str) -> PathBuf {
        self.dir.join(digest).with_extension(ENTRY_EXT)
    }

    fn evict(&self, index: &mut Index) {
        while index.size > self.capacity {
            let (digest, entry) = match index.entries.pop_lru() {
                Some(lru) => lru,
                None => break,
            };
            index.size -= entry.len;
            debug!("evicting {} ({} bytes) from disk", digest, entry.len);
            if let Err(err) = remove_if_present(&self.entry_path(&digest)) {
                warn!("cannot evict {}: {}", digest, err);
            }
        }
    }
}

fn check_version(dir: &Path, expected: u32) -> Result<(), CacheError> {
    let text = match fs::read_to_string(dir.join(VERSION_FILE)) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    // An unreadable version is as good as a foreign one
    let found = text.trim().parse().unwrap_or(0);
    if found == expected {
        Ok(())
    } else {
        Err(CacheError::VersionMismatch { found, expected })
    }
}

fn remove_entries(dir: &Path) -> io::Result<()> {
    for dirent in fs::read_dir(dir)? {
        let path = dirent?.path();
        if path.extension().map_or(false, |ext| ext == ENTRY_EXT) {
            remove_if_present(&path)?;
        }
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn touch(path: &Path) -> io::Result<()> {
    File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::DiskTier;
    use crate::cache::disk_key;

    #[test]
    fn stores_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tier = DiskTier::open(dir.path(), 1, 1024).unwrap();
            tier.put("http://x/a.gif", b"hello").unwrap();
            assert!(tier.contains("http://x/a.gif"));
            assert_eq!(tier.size(), 5);
        }
        let tier = DiskTier::open(dir.path(), 1, 1024).unwrap();
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.get("http://x/a.gif").unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(tier.get("http://x/b.gif").unwrap(), None);
    }

    #[test]
    fn version_change_wipes() {
        let dir = tempfile::tempdir().unwrap();
        DiskTier::open(dir.path(), 1, 1024).unwrap().put("k", b"v").unwrap();
        let tier = DiskTier::open(dir.path(), 2, 1024).unwrap();
        assert!(tier.is_empty());
        assert_eq!(tier.get("k").unwrap(), None);
        let version = fs::read_to_string(dir.path().join("VERSION")).unwrap();
        assert_eq!(version, "2");
    }

    #[test]
    fn evicts_over_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 1, 10).unwrap();
        tier.put("a", &[1; 6]).unwrap();
        tier.put("b", &[2; 6]).unwrap();
        assert!(!tier.contains("a"));
        assert!(tier.contains("b"));
        assert_eq!(tier.size(), 6);
        assert_eq!(tier.get("a").unwrap(), None);
    }

    #[test]
    fn empty_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 1, 10).unwrap();
        assert!(tier.put("a", &[]).is_err());
        assert!(tier.is_empty());
    }

    #[test]
    fn remove_and_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 1, 1024).unwrap();
        tier.put("http://a/1", b"1").unwrap();
        tier.put("http://a/2", b"2").unwrap();
        tier.put("http://b/1", b"3").unwrap();
        assert!(tier.remove("http://b/1").unwrap());
        assert!(!tier.remove("http://b/1").unwrap());
        assert_eq!(tier.remove_with_prefix("http://a/").unwrap(), 2);
        assert!(tier.is_empty());
        assert_eq!(tier.size(), 0);
    }

    #[test]
    fn failed_commit_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 1, 1024).unwrap();
        // a directory in the entry's place makes the final rename fail
        fs::create_dir(tier.entry_path(&disk_key("k"))).unwrap();
        assert!(tier.put("k", b"value").is_err());
        assert!(!tier.contains("k"));
        assert_eq!(tier.size(), 0);
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|d| d.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with(".tmp")), "{:?}", names);
    }

    #[test]
    fn clear_keeps_version() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 3, 1024).unwrap();
        tier.put("a", b"x").unwrap();
        tier.clear().unwrap();
        assert!(tier.is_empty());
        assert!(dir.path().join("VERSION").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
