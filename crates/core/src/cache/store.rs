//! Flat-directory response store.
//!
//! One file per key directly under the cache root. Writes go to a temporary file in the
//! same directory and are renamed into place, so readers see either the old entry or the
//! new one. Writers for the same key are serialized through a lock table sharded by the
//! key digest; writers for keys in different shards never wait on each other.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;

use super::entry::CacheEntry;
use super::key::{CACHE_FILE_EXTENSION, CacheKey};
use crate::Error;

const LOCK_SHARDS: usize = 64;

/// Result of a bulk clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearSummary {
    pub removed: usize,
    pub failed: usize,
}

/// Disk-backed store of cached responses.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    write_locks: Vec<Mutex<()>>,
}

impl CacheStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), write_locks: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect() }
    }

    /// `<temp dir>/HttpCache/Cache`.
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("HttpCache").join("Cache")
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }

    /// Read an entry. Absence is `CacheMiss`; anything else that goes wrong is `CacheRead`.
    pub fn load(&self, key: &CacheKey) -> Result<CacheEntry, Error> {
        let path = self.entry_path(key);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::CacheMiss(key.to_string())),
            Err(e) => return Err(Error::CacheRead { path, reason: e.to_string() }),
        };

        CacheEntry::decode(&bytes).map_err(|e| Error::CacheRead { path, reason: e.to_string() })
    }

    /// Atomically write an entry, replacing any previous one.
    pub fn save(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), Error> {
        let path = self.entry_path(key);
        let write_err = |source| Error::CacheWrite { path: path.clone(), source };

        let _guard = self.shard(key).lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        fs::create_dir_all(&self.root).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(&self.root).map_err(write_err)?;
        tmp.write_all(&entry.encode()).map_err(write_err)?;
        tmp.as_file().sync_data().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        tracing::debug!(key = %key, bytes = entry.body.len(), "cache entry written");
        Ok(())
    }

    /// Delete every entry file directly under the root.
    ///
    /// Best effort: a file that cannot be removed is logged and counted, and the
    /// remaining files are still processed.
    pub fn clear_all(&self) -> ClearSummary {
        let mut summary = ClearSummary::default();

        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return summary,
            Err(e) => {
                tracing::warn!(path = %self.root.display(), error = %e, "failed to list cache directory");
                summary.failed += 1;
                return summary;
            }
        };

        for item in dir {
            let path = match item {
                Ok(item) => item.path(),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read cache directory entry");
                    summary.failed += 1;
                    continue;
                }
            };

            if !path.is_file() {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => summary.removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete cache file");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(removed = summary.removed, failed = summary.failed, "cache cleared");
        summary
    }

    /// Number of entry files currently stored.
    pub fn entry_count(&self) -> usize {
        let Ok(dir) = fs::read_dir(&self.root) else {
            return 0;
        };

        dir.filter_map(Result::ok)
            .map(|item| item.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == CACHE_FILE_EXTENSION))
            .count()
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<()> {
        let digest = key.digest().as_bytes();
        let idx = digest.iter().take(4).fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as usize));
        &self.write_locks[idx % self.write_locks.len()]
    }
}
