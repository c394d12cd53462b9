//! Uniform contract over any backend.
//!
//! [`StorageAdapter`] turns a [`BasicStorage`] into a [`StorageProvider`].
//! Capabilities the backend offers natively (found by probing, never by type)
//! are used directly. Missing ones are synthesized:
//!
//! - **update**: get, modify and set under the adapter's key lock. Plain
//!   writes take the same lock, so they cannot land between the read and
//!   write halves of an update.
//! - **batch**: the backend's all-or-nothing batch if it has one, else its
//!   own batch, else each operation in order under its key lock.

use super::lock::{KeyedMutex, LockConfig};
use super::{
    AtomicBatch, Atomicity, BasicStorage, BatchOp, BatchSemantics, Capabilities,
    RawModifier, StorageProvider,
};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Presents the full [`StorageProvider`] contract over any backend.
#[derive(Clone)]
pub struct StorageAdapter {
    backend: Arc<dyn BasicStorage>,
    locks: KeyedMutex,
}

impl std::fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("backend", &self.backend.backend_name())
            .field("locks", &self.locks)
            .finish()
    }
}

impl StorageAdapter {
    /// Wraps `backend`, using `lock` for any synthesized operation.
    #[must_use]
    pub fn new(backend: Arc<dyn BasicStorage>, lock: LockConfig) -> Self {
        Self {
            backend,
            locks: KeyedMutex::new(lock),
        }
    }

    /// The wrapped backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn BasicStorage> {
        &self.backend
    }

    fn synthesizes_updates(&self) -> bool {
        self.backend.as_atomic_update().is_none()
    }

    async fn apply_locked(&self, op: &BatchOp) -> Result<()> {
        match op {
            BatchOp::Set { key, value } => self.set_item(key, value).await,
            BatchOp::Remove { key } => self.remove_item(key).await,
        }
    }
}

#[async_trait]
impl StorageProvider for StorageAdapter {
    fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.backend.get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        if self.synthesizes_updates() {
            self.locks
                .with_lock(key, self.backend.set_item(key, value))
                .await
        } else {
            self.backend.set_item(key, value).await
        }
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        if self.synthesizes_updates() {
            self.locks
                .with_lock(key, self.backend.remove_item(key))
                .await
        } else {
            self.backend.remove_item(key).await
        }
    }

    async fn clear_all(&self) -> Result<()> {
        if self.synthesizes_updates() {
            self.locks.with_all(self.backend.clear_all()).await
        } else {
            self.backend.clear_all().await
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.backend.list_keys().await
    }

    async fn update_raw(&self, key: &str, modifier: RawModifier) -> Result<String> {
        if let Some(native) = self.backend.as_atomic_update() {
            return native.update_raw(key, modifier).await;
        }

        self.locks
            .with_lock(key, async {
                let current = self.backend.get_item(key).await?;
                let next = modifier(current)?;
                self.backend.set_item(key, &next).await?;
                debug!(key, "Applied synthesized update");
                Ok(next)
            })
            .await
    }

    async fn batch_update(&self, ops: Vec<BatchOp>) -> Result<()> {
        if let Some(atomic) = self.backend.as_atomic_batch() {
            return atomic.apply_atomically(ops).await;
        }
        if let Some(native) = self.backend.as_batch_update() {
            return native.batch_update(ops).await;
        }

        let total = ops.len();
        for (applied, op) in ops.iter().enumerate() {
            if let Err(e) = self.apply_locked(op).await {
                warn!(
                    key = op.key(),
                    applied,
                    total,
                    error = %e,
                    "Batch stopped partway; earlier operations remain applied"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    fn atomic_batch(&self) -> Option<&dyn AtomicBatch> {
        self.backend.as_atomic_batch()
    }

    fn capabilities(&self) -> Capabilities {
        let atomicity = if self.synthesizes_updates() {
            Atomicity::Synthesized
        } else {
            Atomicity::Native
        };
        let batch = if self.backend.as_atomic_batch().is_some() {
            BatchSemantics::Atomic
        } else {
            BatchSemantics::BestEffort
        };

        Capabilities {
            supports_atomic: true,
            supports_batch: true,
            max_size: self.backend.max_size(),
            atomicity,
            batch,
        }
    }
}
