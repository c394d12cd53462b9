//! Simple backend: a synchronous key-value store made safe for concurrent
//! async callers.
//!
//! The store itself has no transactions. [`LocalStorageProvider`] routes every
//! operation on a key through a [`KeyedMutex`], so operations on the same key
//! are totally ordered and read-modify-write via
//! [`AtomicUpdate::update_raw`] is indivisible. `clear_all` excludes every
//! key at once.
//!
//! Store calls run on tokio's blocking pool, since a file-backed store writes
//! to disk synchronously.
//!
//! `batch_update` is **best-effort**: each operation takes its own key lock
//! and a failure partway through leaves the earlier operations applied.

mod store;

pub use store::{DEFAULT_LOCAL_QUOTA, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};

use super::lock::{KeyedMutex, LockConfig};
use super::{AtomicUpdate, BasicStorage, BatchOp, BatchUpdate, RawModifier};
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Async, lock-guarded view over a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct LocalStorageProvider {
    store: Arc<dyn KeyValueStore>,
    locks: KeyedMutex,
}

impl LocalStorageProvider {
    /// Wraps an existing store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, lock: LockConfig) -> Self {
        Self {
            store,
            locks: KeyedMutex::new(lock),
        }
    }

    /// Ephemeral provider over a [`MemoryKeyValueStore`].
    #[must_use]
    pub fn in_memory(quota: Option<u64>, lock: LockConfig) -> Self {
        let store = match quota {
            Some(quota) => MemoryKeyValueStore::with_quota(quota),
            None => MemoryKeyValueStore::new(),
        };
        Self::new(Arc::new(store), lock)
    }

    /// Provider persisted to a JSON file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`](crate::error::Error::Storage) if an existing file cannot be loaded.
    pub fn open(path: &Path, quota: Option<u64>, lock: LockConfig) -> Result<Self> {
        let store = FileKeyValueStore::open(path, quota)?;
        Ok(Self::new(Arc::new(store), lock))
    }

    async fn on_store<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn KeyValueStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || call(store.as_ref()))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
    }

    async fn apply(&self, op: &BatchOp) -> Result<()> {
        match op {
            BatchOp::Set { key, value } => self.set_item(key, value).await,
            BatchOp::Remove { key } => self.remove_item(key).await,
        }
    }
}

#[async_trait]
impl BasicStorage for LocalStorageProvider {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let owned = key.to_string();
        self.locks
            .with_lock(key, self.on_store(move |store| Ok(store.get(&owned)?)))
            .await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let (owned, value) = (key.to_string(), value.to_string());
        self.locks
            .with_lock(key, self.on_store(move |store| Ok(store.set(&owned, &value)?)))
            .await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let owned = key.to_string();
        self.locks
            .with_lock(key, self.on_store(move |store| Ok(store.remove(&owned)?)))
            .await
    }

    async fn clear_all(&self) -> Result<()> {
        self.locks
            .with_all(self.on_store(|store| Ok(store.clear()?)))
            .await
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.on_store(|store| Ok(store.keys()?)).await
    }

    fn max_size(&self) -> Option<u64> {
        self.store.quota()
    }

    fn as_atomic_update(&self) -> Option<&dyn AtomicUpdate> {
        Some(self)
    }

    fn as_batch_update(&self) -> Option<&dyn BatchUpdate> {
        Some(self)
    }
}

#[async_trait]
impl AtomicUpdate for LocalStorageProvider {
    async fn update_raw(&self, key: &str, modifier: RawModifier) -> Result<String> {
        let owned = key.to_string();
        let next = self
            .locks
            .with_lock(
                key,
                self.on_store(move |store| {
                    let current = store.get(&owned)?;
                    let next = modifier(current)?;
                    store.set(&owned, &next)?;
                    Ok(next)
                }),
            )
            .await?;
        debug!(key, "Updated local key");
        Ok(next)
    }
}

#[async_trait]
impl BatchUpdate for LocalStorageProvider {
    async fn batch_update(&self, ops: Vec<BatchOp>) -> Result<()> {
        let total = ops.len();
        for (applied, op) in ops.iter().enumerate() {
            if let Err(e) = self.apply(op).await {
                warn!(
                    key = op.key(),
                    applied,
                    total,
                    error = %e,
                    "Local batch stopped partway; earlier operations remain applied"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, StorageError};
    use std::time::Duration;

    fn modifier(
        f: impl FnOnce(Option<String>) -> Result<String> + Send + 'static,
    ) -> RawModifier {
        Box::new(f)
    }

    fn provider() -> LocalStorageProvider {
        LocalStorageProvider::in_memory(None, LockConfig::default())
    }

    #[tokio::test]
    async fn update_raw_writes_modifier_result() {
        let local = provider();
        let written = local
            .update_raw("k", modifier(|current| Ok(format!("{}!", current.unwrap_or_default()))))
            .await
            .unwrap();

        assert_eq!(written, "!");
        assert_eq!(local.get_item("k").await.unwrap().as_deref(), Some("!"));
    }

    #[tokio::test]
    async fn failing_modifier_writes_nothing_and_keeps_error_kind() {
        let local = provider();
        local.set_item("k", "before").await.unwrap();

        let err = local
            .update_raw("k", modifier(|_| Err(Error::DuplicateRecord("a".to_string()))))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DuplicateRecord(ref id) if id == "a"));
        assert_eq!(local.get_item("k").await.unwrap().as_deref(), Some("before"));
        // The key lock was released.
        local.set_item("k", "after").await.unwrap();
    }

    #[tokio::test]
    async fn quota_failure_is_a_storage_fault() {
        let local = LocalStorageProvider::in_memory(Some(4), LockConfig::default());
        let err = local.set_item("key", "value").await.unwrap_err();

        assert!(matches!(
            err,
            Error::Storage(StorageError::QuotaExceeded { .. })
        ));
        assert_eq!(local.max_size(), Some(4));
    }

    #[tokio::test]
    async fn batch_is_best_effort() {
        let local = LocalStorageProvider::in_memory(Some(10), LockConfig::default());
        let ops = vec![
            BatchOp::Set {
                key: "a".into(),
                value: "1".into(),
            },
            BatchOp::Set {
                key: "b".into(),
                value: "far too long for the quota".into(),
            },
            BatchOp::Set {
                key: "c".into(),
                value: "3".into(),
            },
        ];

        assert!(local.batch_update(ops).await.is_err());
        assert_eq!(local.get_item("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(local.get_item("b").await.unwrap(), None);
        assert_eq!(local.get_item("c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_waits_for_key_holders() {
        let local = LocalStorageProvider::in_memory(
            None,
            LockConfig {
                acquire_timeout: Duration::from_millis(50),
                hold_timeout: Duration::from_secs(30),
            },
        );
        local.set_item("k", "v").await.unwrap();

        let _held = local.locks.acquire("k").await.unwrap();
        let err = local.clear_all().await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout { ref key, .. } if key == "*"));
        assert_eq!(local.list_keys().await.unwrap(), vec!["k"]);
    }

    #[tokio::test]
    async fn file_backed_writes_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("local.json");
        {
            let local = LocalStorageProvider::open(&path, None, LockConfig::default()).unwrap();
            local.set_item("a", "1").await.unwrap();
            local
                .update_raw("b", modifier(|_| Ok("2".to_string())))
                .await
                .unwrap();
        }

        let reopened = LocalStorageProvider::open(&path, None, LockConfig::default()).unwrap();
        assert_eq!(reopened.list_keys().await.unwrap(), vec!["a", "b"]);
        assert_eq!(reopened.get_item("b").await.unwrap().as_deref(), Some("2"));
    }
}
