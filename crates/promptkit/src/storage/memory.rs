//! Bare in-memory backend.
//!
//! [`MemoryStorageProvider`] implements only the minimal [`BasicStorage`]
//! contract: no native atomic update, no batching. Wrapped in a
//! [`StorageAdapter`](super::StorageAdapter) it exercises the synthesized
//! read-modify-write path. Data is **ephemeral** and lost when the provider
//! is dropped.
//!
//! Two knobs make it useful for concurrency and fault tests:
//!
//! - [`with_latency`](MemoryStorageProvider::with_latency) suspends every
//!   operation before it touches the map, so unguarded read-modify-write
//!   sequences really do interleave.
//! - [`fail_reads`](MemoryStorageProvider::fail_reads) and
//!   [`fail_writes`](MemoryStorageProvider::fail_writes) make operations
//!   return [`StorageError`]s until switched off.

use super::BasicStorage;
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Ephemeral key-value backend exposing only the minimal contract.
#[derive(Debug, Default)]
pub struct MemoryStorageProvider {
    items: Arc<Mutex<HashMap<String, String>>>,
    latency: Option<Duration>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStorageProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a simulated I/O delay to every operation.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes subsequent reads fail (`true`) or succeed (`false`).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent writes fail (`true`) or succeed (`false`).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    async fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.items.lock().await
    }

    fn check_read(&self, key: &str) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Read {
                key: key.to_string(),
                reason: "injected read failure".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn check_write(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Write {
                key: key.to_string(),
                reason: "injected write failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl BasicStorage for MemoryStorageProvider {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self.lock().await;
        self.check_read(key)?;
        Ok(items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self.lock().await;
        self.check_write(key)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let mut items = self.lock().await;
        self.check_write(key)?;
        items.remove(key);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut items = self.lock().await;
        self.check_write("*")?;
        items.clear();
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let items = self.lock().await;
        self.check_read("*")?;
        let mut keys: Vec<String> = items.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
