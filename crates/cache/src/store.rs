//! On-disk media cache indexed by `CacheKey`.
//!
//! Each entry is a `<key>.mp3` file plus a `<key>.json` sidecar holding the
//! name the file is served under, so a reopened cache serves the same names.

use crate::keys::CacheKey;
use audiograb_core::{StorageError, CACHE_EXTENSION};
use audiograb_utils::{copy_to_temp, write_to_temp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const META_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub file_path: PathBuf,
    pub created_at: SystemTime,
    /// Title-derived filename of the fetch that filled the entry
    pub display_name: String,
}

/// Persisted alongside each cache file
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    display_name: String,
}

/// Outcome of one eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    pub evicted: usize,
    pub failed: usize,
}

/// Maps cache keys to files in a single cache directory.
///
/// The index lock is held for index changes plus the renames or deletes that
/// go with them, never across a file copy.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    index: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl CacheStore {
    /// Open the cache at `dir`, creating it if needed and re-indexing any
    /// cache files already there. A cache file without readable metadata
    /// cannot be served under its original name and is deleted.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::new(&dir, "create cache directory", e))?;

        let mut index = HashMap::new();
        let entries = fs::read_dir(&dir).map_err(|e| StorageError::new(&dir, "list cache", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::new(&dir, "read cache entry", e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CACHE_EXTENSION) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(CacheKey::from_file_stem)
            else {
                continue;
            };
            let created_at = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!("Skipping unreadable cache file {}: {}", path.display(), e);
                    continue;
                }
            };
            let meta_path = meta_path_for(&path);
            let Some(meta) = read_meta(&meta_path) else {
                tracing::warn!("Dropping cache file without metadata {}", path.display());
                remove_if_present(&path);
                remove_if_present(&meta_path);
                continue;
            };
            index.insert(
                key.clone(),
                CacheEntry {
                    key,
                    file_path: path,
                    created_at,
                    display_name: meta.display_name,
                },
            );
        }

        tracing::debug!(dir = %dir.display(), entries = index.len(), "cache index loaded");
        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the file for `key` lives once cached
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.{CACHE_EXTENSION}"))
    }

    /// Live entry for `key`. An entry whose file has disappeared is dropped
    /// and reported as a miss.
    pub fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut index = self.index.lock();
        let entry = index.get(key)?;
        if entry.file_path.is_file() {
            return Some(entry.clone());
        }
        tracing::debug!(%key, "cache file missing, dropping entry");
        remove_if_present(&meta_path_for(&entry.file_path));
        index.remove(key);
        None
    }

    /// Copy `source` into the cache under `key`, replacing any earlier entry.
    /// `display_name` is the name the file is served under.
    pub async fn put(
        &self,
        key: &CacheKey,
        source: &Path,
        display_name: &str,
    ) -> Result<CacheEntry, StorageError> {
        let target = self.path_for(key);
        let meta_target = meta_path_for(&target);
        let meta = serde_json::to_vec(&EntryMeta {
            display_name: display_name.to_string(),
        })
        .map_err(|e| StorageError::other(&meta_target, "encode cache metadata", e.to_string()))?;

        let temp_meta = write_to_temp(&self.dir, &meta).await?;
        let temp = match copy_to_temp(source, &self.dir).await {
            Ok(temp) => temp,
            Err(e) => {
                remove_if_present(&temp_meta);
                return Err(e);
            }
        };

        let mut index = self.index.lock();
        // Metadata first, so a published cache file always has its name
        let published = fs::rename(&temp_meta, &meta_target)
            .map_err(|e| StorageError::new(&meta_target, "publish cache metadata", e))
            .and_then(|()| {
                fs::rename(&temp, &target)
                    .map_err(|e| StorageError::new(&target, "publish cache file", e))
            });
        if let Err(e) = published {
            remove_if_present(&temp_meta);
            remove_if_present(&temp);
            return Err(e);
        }
        let entry = CacheEntry {
            key: key.clone(),
            file_path: target,
            created_at: SystemTime::now(),
            display_name: display_name.to_string(),
        };
        index.insert(key.clone(), entry.clone());
        tracing::debug!(%key, "cache entry stored");
        Ok(entry)
    }

    /// Remove every entry older than `ttl`
    pub fn evict_older_than(&self, ttl: Duration) -> EvictionStats {
        self.evict_at(SystemTime::now(), ttl)
    }

    pub(crate) fn evict_at(&self, now: SystemTime, ttl: Duration) -> EvictionStats {
        let mut stats = EvictionStats::default();
        let mut index = self.index.lock();
        let expired: Vec<CacheKey> = index
            .values()
            .filter(|entry| {
                now.duration_since(entry.created_at)
                    .is_ok_and(|age| age > ttl)
            })
            .map(|entry| entry.key.clone())
            .collect();

        for key in expired {
            let Some(entry) = index.get(&key) else {
                continue;
            };
            match fs::remove_file(&entry.file_path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        "Failed to remove expired cache file {}: {}",
                        entry.file_path.display(),
                        e
                    );
                    stats.failed += 1;
                    continue;
                }
            }
            remove_if_present(&meta_path_for(&entry.file_path));
            index.remove(&key);
            stats.evicted += 1;
        }
        stats
    }

    /// Drop one entry and its file. Returns whether an entry existed.
    pub fn remove(&self, key: &CacheKey) -> Result<bool, StorageError> {
        let mut index = self.index.lock();
        let Some(entry) = index.remove(key) else {
            return Ok(false);
        };
        match fs::remove_file(&entry.file_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                let path = entry.file_path.clone();
                index.insert(key.clone(), entry);
                return Err(StorageError::new(&path, "remove cache file", e));
            }
        }
        remove_if_present(&meta_path_for(&entry.file_path));
        Ok(true)
    }

    /// Remove every entry. Entries whose file cannot be deleted stay indexed.
    pub fn clear(&self) -> EvictionStats {
        let mut stats = EvictionStats::default();
        let keys: Vec<CacheKey> = self.index.lock().keys().cloned().collect();
        for key in keys {
            match self.remove(&key) {
                Ok(true) => stats.evicted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("{e}");
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }
}

fn meta_path_for(cache_file: &Path) -> PathBuf {
    cache_file.with_extension(META_EXTENSION)
}

fn read_meta(path: &Path) -> Option<EntryMeta> {
    let raw = fs::read(path).ok()?;
    match serde_json::from_slice(&raw) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::warn!("Invalid cache metadata {}: {}", path.display(), e);
            None
        }
    }
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}
