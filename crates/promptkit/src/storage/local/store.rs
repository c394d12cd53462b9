//! Synchronous key-value stores behind the local backend.
//!
//! These behave like a browser's `localStorage`: string keys, string values,
//! every call completes synchronously, and the whole store is bounded by a
//! byte quota counted as the UTF-8 length of every key plus its value.

use crate::error::StorageError;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Default quota for file-backed stores (5 MiB).
pub const DEFAULT_LOCAL_QUOTA: u64 = 5 * 1024 * 1024;

type StoreResult<T> = std::result::Result<T, StorageError>;

/// A synchronous string key-value store.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Returns the value for `key`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the store cannot be read.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QuotaExceeded`] if the store would outgrow its
    /// quota, or another [`StorageError`] if the write fails.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removes `key` if present.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the write fails.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Removes every key.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the write fails.
    fn clear(&self) -> StoreResult<()>;

    /// Lists every key in ascending order.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the store cannot be read.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// The byte quota, if the store has one.
    fn quota(&self) -> Option<u64>;
}

fn usage(map: &BTreeMap<String, String>) -> u64 {
    map.iter()
        .map(|(k, v)| (k.len() + v.len()) as u64)
        .sum()
}

/// Fails if storing `value` under `key` would push `map` past `limit`.
fn check_quota(
    map: &BTreeMap<String, String>,
    key: &str,
    value: &str,
    limit: Option<u64>,
) -> StoreResult<()> {
    let Some(limit) = limit else {
        return Ok(());
    };
    let replaced = map.get(key).map_or(0, |old| (key.len() + old.len()) as u64);
    let required = usage(map) - replaced + (key.len() + value.len()) as u64;
    if required > limit {
        return Err(StorageError::QuotaExceeded {
            key: key.to_string(),
            required,
            limit,
        });
    }
    Ok(())
}

fn write_and_rename(temp: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(temp, target)
}

fn lock(map: &Mutex<BTreeMap<String, String>>) -> MutexGuard<'_, BTreeMap<String, String>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local store held in a map.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: Mutex<BTreeMap<String, String>>,
    quota: Option<u64>,
}

impl MemoryKeyValueStore {
    /// Creates an empty store without a quota.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store limited to `quota` bytes.
    #[must_use]
    pub fn with_quota(quota: u64) -> Self {
        Self {
            items: Mutex::default(),
            quota: Some(quota),
        }
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(lock(&self.items).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut items = lock(&self.items);
        check_quota(&items, key, value, self.quota)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        lock(&self.items).remove(key);
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        lock(&self.items).clear();
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(lock(&self.items).keys().cloned().collect())
    }

    fn quota(&self) -> Option<u64> {
        self.quota
    }
}

/// Store persisted as a single JSON object file.
///
/// The file is read once on open. Every mutation rewrites it through a
/// sibling temp file and a rename, so a crash leaves either the old or the
/// new contents.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
    quota: Option<u64>,
}

impl FileKeyValueStore {
    /// Opens (or starts) the store at `path`.
    ///
    /// A missing file is an empty store; it is created on the first write.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file exists but cannot be read,
    /// or [`StorageError::Read`] if it is not a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>, quota: Option<u64>) -> StoreResult<Self> {
        let path = path.into();
        let items = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| StorageError::Read {
                key: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = items.len(), "Opened local store");

        Ok(Self {
            path,
            items: Mutex::new(items),
            quota,
        })
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> StoreResult<()> {
        let bytes = serde_json::to_vec(items).map_err(|e| StorageError::Write {
            key: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        if let Err(e) = write_and_rename(&temp, &self.path, &bytes) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Applies `change` to a copy of the map, persists it, then commits.
    fn mutate(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let mut items = lock(&self.items);
        let mut next = items.clone();
        change(&mut next)?;
        self.persist(&next)?;
        *items = next;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(lock(&self.items).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.mutate(|items| {
            check_quota(items, key, value, self.quota)?;
            items.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        if !lock(&self.items).contains_key(key) {
            return Ok(());
        }
        self.mutate(|items| {
            items.remove(key);
            Ok(())
        })
    }

    fn clear(&self) -> StoreResult<()> {
        self.mutate(|items| {
            items.clear();
            Ok(())
        })
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(lock(&self.items).keys().cloned().collect())
    }

    fn quota(&self) -> Option<u64> {
        self.quota
    }
}
