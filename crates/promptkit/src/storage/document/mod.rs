//! Transactional backend.
//!
//! [`DocumentStorageProvider`] stores each key as a [`StorageRecord`] in a
//! [`DocumentDb`]. Every mutation is a native transaction, so
//! `update_raw` is atomic without a key lock and batches apply
//! all-or-nothing.
//!
//! Before serving its first operation the provider runs the one-time
//! migration from the local store through the shared
//! [`MigrationCoordinator`].

mod db;
mod migration;

pub use db::{DocumentDb, META_FILE, RECORDS_FILE, Transaction};
pub use migration::{MIGRATION_FLAG_KEY, MigrationCoordinator, MigrationOutcome, migrate};

use super::{AtomicBatch, AtomicUpdate, BasicStorage, BatchOp, RawModifier};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Storage provider backed by a [`DocumentDb`].
#[derive(Clone)]
pub struct DocumentStorageProvider {
    db: Arc<DocumentDb>,
    source: Option<Arc<dyn BasicStorage>>,
    coordinator: Arc<MigrationCoordinator>,
}

impl std::fmt::Debug for DocumentStorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStorageProvider")
            .field("db", &self.db)
            .field("source", &self.source.as_ref().map(|s| s.backend_name()))
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl DocumentStorageProvider {
    /// Provider without a migration source.
    #[must_use]
    pub fn new(db: Arc<DocumentDb>) -> Self {
        Self {
            db,
            source: None,
            coordinator: Arc::new(MigrationCoordinator::new()),
        }
    }

    /// Provider that migrates from `source` on first use.
    #[must_use]
    pub fn with_migration(
        db: Arc<DocumentDb>,
        source: Arc<dyn BasicStorage>,
        coordinator: Arc<MigrationCoordinator>,
    ) -> Self {
        Self {
            db,
            source: Some(source),
            coordinator,
        }
    }

    /// The underlying database.
    #[must_use]
    pub fn db(&self) -> &Arc<DocumentDb> {
        &self.db
    }

    /// Result of the migration attempt, once it has run.
    #[must_use]
    pub fn migration_outcome(&self) -> Option<MigrationOutcome> {
        self.coordinator.outcome()
    }

    /// Waits for migration to finish. Never fails.
    pub async fn ensure_ready(&self) {
        if let Some(source) = &self.source {
            self.coordinator
                .ensure_migrated(source.as_ref(), &self.db)
                .await;
        }
    }
}

#[async_trait]
impl BasicStorage for DocumentStorageProvider {
    fn backend_name(&self) -> &'static str {
        "document"
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.ensure_ready().await;
        Ok(self.db.get(key).await.map(|record| record.value))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_ready().await;
        self.db
            .transaction(|tx| {
                tx.put(key, value);
                Ok(())
            })
            .await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.ensure_ready().await;
        self.db
            .transaction(|tx| {
                tx.delete(key);
                Ok(())
            })
            .await
    }

    async fn clear_all(&self) -> Result<()> {
        self.ensure_ready().await;
        self.db
            .transaction(|tx| {
                tx.clear();
                Ok(())
            })
            .await
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.ensure_ready().await;
        Ok(self.db.keys().await)
    }

    fn as_atomic_update(&self) -> Option<&dyn AtomicUpdate> {
        Some(self)
    }

    fn as_atomic_batch(&self) -> Option<&dyn AtomicBatch> {
        Some(self)
    }
}

#[async_trait]
impl AtomicUpdate for DocumentStorageProvider {
    async fn update_raw(&self, key: &str, modifier: RawModifier) -> Result<String> {
        self.ensure_ready().await;
        self.db
            .transaction(|tx| {
                let current = tx.get(key).map(str::to_string);
                let next = modifier(current)?;
                tx.put(key, next.clone());
                Ok(next)
            })
            .await
    }
}

#[async_trait]
impl AtomicBatch for DocumentStorageProvider {
    async fn apply_atomically(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.ensure_ready().await;
        let count = ops.len();
        self.db
            .transaction(|tx| {
                for op in ops {
                    match op {
                        BatchOp::Set { key, value } => tx.put(key, value),
                        BatchOp::Remove { key } => tx.delete(&key),
                    }
                }
                Ok(())
            })
            .await?;
        debug!(count, "Applied atomic batch");
        Ok(())
    }
}
