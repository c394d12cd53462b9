//! Construction and memoization of storage providers.
//!
//! A [`StorageFactory`] is owned by the composition root ([`crate::App`]) and
//! passed to whoever needs storage. It builds at most one provider per
//! [`StorageKind`] and hands out shared references to it afterwards.
//!
//! [`StorageFactory::create_default`] prefers the document backend and falls
//! back to the local one if the document backend cannot be constructed. The
//! choice, fallback included, is remembered.

use super::document::{DocumentDb, DocumentStorageProvider, MigrationCoordinator, MigrationOutcome};
use super::local::{DEFAULT_LOCAL_QUOTA, LocalStorageProvider};
use super::lock::LockConfig;
use super::memory::MemoryStorageProvider;
use super::{BasicStorage, StorageAdapter, StorageProvider};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// File name of the local store inside the data directory.
pub const LOCAL_STORE_FILE: &str = "local.json";

/// Directory of the document database inside the data directory.
pub const DOCUMENT_DIR: &str = "document";

/// Storage backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Bare in-memory map; synthesized atomicity.
    Memory,
    /// Synchronous key-value store guarded by key locks.
    Local,
    /// Transactional table store with migration from `Local`.
    Document,
}

impl StorageKind {
    /// Lowercase name, as used in configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Local => "local",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "local" => Ok(Self::Local),
            "document" => Ok(Self::Document),
            other => Err(Error::Unsupported(format!("storage backend '{other}'"))),
        }
    }
}

/// Settings shared by every provider the factory builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    /// Where on-disk backends keep their files. `None` keeps everything in
    /// memory.
    pub data_dir: Option<PathBuf>,
    /// Key lock timeouts.
    pub lock: LockConfig,
    /// Byte quota of the local store.
    pub local_quota: Option<u64>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            data_dir: None,
            lock: LockConfig::default(),
            local_quota: Some(DEFAULT_LOCAL_QUOTA),
        }
    }
}

#[derive(Debug)]
struct FactoryState {
    instances: HashMap<StorageKind, Arc<StorageAdapter>>,
    default: Option<Arc<StorageAdapter>>,
    coordinator: Arc<MigrationCoordinator>,
}

impl FactoryState {
    fn new() -> Self {
        Self {
            instances: HashMap::new(),
            default: None,
            coordinator: Arc::new(MigrationCoordinator::new()),
        }
    }
}

/// Builds and memoizes storage providers.
#[derive(Debug)]
pub struct StorageFactory {
    options: StorageOptions,
    state: Mutex<FactoryState>,
}

impl StorageFactory {
    /// Creates a factory that has built nothing yet.
    #[must_use]
    pub fn new(options: StorageOptions) -> Self {
        Self {
            options,
            state: Mutex::new(FactoryState::new()),
        }
    }

    /// The options providers are built with.
    #[must_use]
    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Returns the provider for `kind`, building it on first request.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be constructed. The failed kind
    /// is not memoized.
    pub async fn create(&self, kind: StorageKind) -> Result<Arc<StorageAdapter>> {
        let mut state = self.state.lock().await;
        self.get_or_build(&mut state, kind).await
    }

    /// Returns the process default provider.
    ///
    /// The document backend is tried first; if it fails to construct, the
    /// local backend is used instead and remembered as the default.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local fallback also fails.
    pub async fn create_default(&self) -> Result<Arc<StorageAdapter>> {
        let mut state = self.state.lock().await;
        if let Some(default) = &state.default {
            return Ok(Arc::clone(default));
        }

        let provider = match self.get_or_build(&mut state, StorageKind::Document).await {
            Ok(provider) => provider,
            Err(e) => {
                warn!(error = %e, "Document storage unavailable; falling back to local storage");
                self.get_or_build(&mut state, StorageKind::Local).await?
            }
        };
        info!(backend = provider.backend_name(), "Selected default storage");
        state.default = Some(Arc::clone(&provider));
        Ok(provider)
    }

    /// Drops every memoized provider and the migration state.
    ///
    /// Intended for test isolation.
    pub async fn reset(&self) {
        *self.state.lock().await = FactoryState::new();
    }

    /// Outcome of the migration into the document backend, if it has run.
    pub async fn migration_outcome(&self) -> Option<MigrationOutcome> {
        self.state.lock().await.coordinator.outcome()
    }

    async fn get_or_build(
        &self,
        state: &mut FactoryState,
        kind: StorageKind,
    ) -> Result<Arc<StorageAdapter>> {
        if let Some(existing) = state.instances.get(&kind) {
            return Ok(Arc::clone(existing));
        }

        let backend: Arc<dyn BasicStorage> = match kind {
            StorageKind::Memory => Arc::new(MemoryStorageProvider::new()),
            StorageKind::Local => self.build_local()?,
            StorageKind::Document => {
                let source = match state.instances.get(&StorageKind::Local) {
                    Some(local) => Arc::clone(local.backend()),
                    None => {
                        let local = self.build_local()?;
                        state.instances.insert(
                            StorageKind::Local,
                            Arc::new(StorageAdapter::new(Arc::clone(&local), self.options.lock)),
                        );
                        local
                    }
                };
                self.build_document(source, Arc::clone(&state.coordinator))
                    .await?
            }
        };

        let adapter = Arc::new(StorageAdapter::new(backend, self.options.lock));
        state.instances.insert(kind, Arc::clone(&adapter));
        info!(%kind, "Created storage provider");
        Ok(adapter)
    }

    fn build_local(&self) -> Result<Arc<dyn BasicStorage>> {
        let provider = match &self.options.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                LocalStorageProvider::open(
                    &dir.join(LOCAL_STORE_FILE),
                    self.options.local_quota,
                    self.options.lock,
                )?
            }
            None => LocalStorageProvider::in_memory(self.options.local_quota, self.options.lock),
        };
        Ok(Arc::new(provider))
    }

    async fn build_document(
        &self,
        source: Arc<dyn BasicStorage>,
        coordinator: Arc<MigrationCoordinator>,
    ) -> Result<Arc<dyn BasicStorage>> {
        let db = match &self.options.data_dir {
            Some(dir) => DocumentDb::open(dir.join(DOCUMENT_DIR)).await?,
            None => DocumentDb::in_memory(),
        };
        Ok(Arc::new(DocumentStorageProvider::with_migration(
            Arc::new(db),
            source,
            coordinator,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case::memory("memory", StorageKind::Memory)]
    #[case::mixed_case("Document", StorageKind::Document)]
    #[case::local("local", StorageKind::Local)]
    fn parses_kind(#[case] input: &str, #[case] expected: StorageKind) {
        assert_eq!(input.parse::<StorageKind>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(matches!(
            "sqlite".parse::<StorageKind>(),
            Err(Error::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn instances_are_memoized_per_kind() {
        let factory = StorageFactory::new(StorageOptions::default());
        let a = factory.create(StorageKind::Memory).await.unwrap();
        let b = factory.create(StorageKind::Memory).await.unwrap();
        let c = factory.create(StorageKind::Local).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn default_prefers_document() {
        let factory = StorageFactory::new(StorageOptions::default());
        let default = factory.create_default().await.unwrap();
        let again = factory.create_default().await.unwrap();

        assert_eq!(default.backend_name(), "document");
        assert!(Arc::ptr_eq(&default, &again));
    }

    #[tokio::test]
    async fn default_falls_back_to_local_and_remembers() {
        let dir = TempDir::new().unwrap();
        // A file where the document directory should go makes it unopenable.
        std::fs::write(dir.path().join(DOCUMENT_DIR), "not a directory").unwrap();
        let factory = StorageFactory::new(StorageOptions {
            data_dir: Some(dir.path().to_path_buf()),
            ..StorageOptions::default()
        });

        let default = factory.create_default().await.unwrap();
        assert_eq!(default.backend_name(), "local");

        let again = factory.create_default().await.unwrap();
        assert!(Arc::ptr_eq(&default, &again));
    }

    #[tokio::test]
    async fn document_migrates_from_shared_local_instance() {
        let factory = StorageFactory::new(StorageOptions::default());
        let local = factory.create(StorageKind::Local).await.unwrap();
        local.set_item("prompt_history", "[]").await.unwrap();

        let document = factory.create(StorageKind::Document).await.unwrap();
        assert_eq!(
            document.get_item("prompt_history").await.unwrap().as_deref(),
            Some("[]")
        );
        assert_eq!(
            factory.migration_outcome().await,
            Some(MigrationOutcome::Migrated { keys: 1 })
        );
    }

    #[tokio::test]
    async fn reset_forgets_instances() {
        let factory = StorageFactory::new(StorageOptions::default());
        let before = factory.create(StorageKind::Memory).await.unwrap();
        before.set_item("k", "v").await.unwrap();

        factory.reset().await;
        let after = factory.create(StorageKind::Memory).await.unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.get_item("k").await.unwrap(), None);
    }
}
