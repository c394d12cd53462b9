//! Application context: the composition root.
//!
//! [`App`] owns the [`StorageFactory`], picks the configured backend and
//! hands the resulting provider to a [`HistoryManager`]. Nothing is created
//! at import time; tests build an isolated `App` each.
//!
//! # Example
//!
//! ```no_run
//! use promptkit::app::App;
//! use std::path::Path;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let app = App::from_directory(Path::new(".")).await?;
//!     let chains = app.history().get_all_chains().await?;
//!     println!("{} chains", chains.len());
//!     Ok(())
//! }
//! ```

use crate::commands::init::find_promptkit_root;
use crate::config::{CONFIG_FILE_NAME, PROMPTKIT_DIR_NAME, PromptkitConfig};
use crate::error::{Error, Result};
use crate::history::HistoryManager;
use crate::storage::{
    Capabilities, MigrationOutcome, StorageAdapter, StorageFactory, StorageOptions,
    StorageProvider,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Snapshot of the active storage, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    /// Backend name
    pub backend: &'static str,
    /// What the provider guarantees
    pub capabilities: Capabilities,
    /// Result of the migration into the document backend, if it ran
    pub migration: Option<MigrationOutcome>,
    /// Number of stored keys
    pub keys: usize,
    /// Data directory, if the backend is on disk
    pub data_dir: Option<PathBuf>,
}

/// Application context for CLI operations.
pub struct App {
    config: PromptkitConfig,
    root_dir: Option<PathBuf>,
    factory: StorageFactory,
    storage: Arc<StorageAdapter>,
    history: HistoryManager,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("root_dir", &self.root_dir)
            .field("backend", &self.storage.backend_name())
            .field("max_records", &self.history.max_records())
            .finish_non_exhaustive()
    }
}

impl App {
    /// Create an App for the project containing `working_dir`.
    ///
    /// Searches up the directory tree for `.promptkit/`, loads its
    /// configuration and opens the configured storage.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No promptkit project is found in the directory tree
    /// - Configuration cannot be loaded
    /// - Storage initialization fails
    pub async fn from_directory(working_dir: &Path) -> Result<Self> {
        let root_dir = find_promptkit_root(working_dir).ok_or_else(|| {
            Error::Config(
                "Not a promptkit project (or any parent directory). Run 'promptkit init' first"
                    .to_string(),
            )
        })?;

        let config_path = root_dir.join(PROMPTKIT_DIR_NAME).join(CONFIG_FILE_NAME);
        let config = PromptkitConfig::load(&config_path).await?;

        Self::with_config(config, Some(root_dir)).await
    }

    /// Create an App from an explicit configuration.
    ///
    /// Without a `root_dir` every backend keeps its data in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or storage cannot be
    /// constructed.
    pub async fn with_config(config: PromptkitConfig, root_dir: Option<PathBuf>) -> Result<Self> {
        config.validate()?;

        let options = match &root_dir {
            Some(root) => config.storage_options(root),
            None => StorageOptions {
                lock: config.lock_config(),
                ..StorageOptions::default()
            },
        };
        let factory = StorageFactory::new(options);
        let storage = match config.storage.backend.kind() {
            Some(kind) => factory.create(kind).await?,
            None => factory.create_default().await?,
        };

        let provider: Arc<dyn StorageProvider> = storage.clone();
        let history = HistoryManager::with_max_records(provider, config.history.max_records);

        Ok(Self {
            config,
            root_dir,
            factory,
            storage,
            history,
        })
    }

    /// An App with default configuration and no files on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be constructed.
    pub async fn in_memory() -> Result<Self> {
        Self::with_config(PromptkitConfig::default(), None).await
    }

    /// The history manager.
    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    /// The active storage provider.
    pub fn storage(&self) -> &Arc<StorageAdapter> {
        &self.storage
    }

    /// The storage factory.
    pub fn factory(&self) -> &StorageFactory {
        &self.factory
    }

    /// The loaded configuration.
    pub fn config(&self) -> &PromptkitConfig {
        &self.config
    }

    /// Project root, if the App was loaded from a directory.
    pub fn root_dir(&self) -> Option<&Path> {
        self.root_dir.as_deref()
    }

    /// Describe the active storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the keys cannot be listed.
    pub async fn storage_info(&self) -> Result<StorageInfo> {
        let keys = self.storage.list_keys().await?.len();
        Ok(StorageInfo {
            backend: self.storage.backend_name(),
            capabilities: self.storage.capabilities(),
            migration: self.factory.migration_outcome().await,
            keys,
            data_dir: self.factory.options().data_dir.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::init;
    use crate::config::BackendSetting;
    use crate::domain::NewChain;
    use tempfile::TempDir;

    fn new_chain() -> NewChain {
        NewChain {
            original_prompt: "summarize this".into(),
            optimized_prompt: "Summarize the text in three bullet points.".into(),
            model_key: "gpt".into(),
            template_id: "general".into(),
            ..NewChain::default()
        }
    }

    #[tokio::test]
    async fn test_app_from_initialized_directory() {
        let temp_dir = TempDir::new().unwrap();
        init::init(temp_dir.path(), None).await.unwrap();

        let app = App::from_directory(temp_dir.path()).await.unwrap();

        assert_eq!(app.root_dir(), Some(temp_dir.path()));
        assert_eq!(app.storage().backend_name(), "document");
    }

    #[tokio::test]
    async fn test_app_from_subdirectory() {
        let temp_dir = TempDir::new().unwrap();
        init::init(temp_dir.path(), Some(BackendSetting::Local))
            .await
            .unwrap();

        let sub_dir = temp_dir.path().join("src").join("lib");
        std::fs::create_dir_all(&sub_dir).unwrap();

        let app = App::from_directory(&sub_dir).await.unwrap();
        assert_eq!(app.storage().backend_name(), "local");
    }

    #[tokio::test]
    async fn test_app_not_initialized() {
        let temp_dir = TempDir::new().unwrap();

        let err = App::from_directory(temp_dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("promptkit init")));
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        init::init(temp_dir.path(), None).await.unwrap();

        let chain = {
            let app = App::from_directory(temp_dir.path()).await.unwrap();
            app.history().create_new_chain(new_chain()).await.unwrap()
        };

        let app = App::from_directory(temp_dir.path()).await.unwrap();
        let reloaded = app.history().get_chain(&chain.chain_id).await.unwrap();
        assert_eq!(reloaded, chain);
    }

    #[tokio::test]
    async fn test_configured_max_records_is_applied() {
        let mut config = PromptkitConfig::with_backend(BackendSetting::Memory);
        config.history.max_records = 3;

        let app = App::with_config(config, None).await.unwrap();
        assert_eq!(app.history().max_records(), 3);
    }

    #[tokio::test]
    async fn test_storage_info_reports_migration() {
        let app = App::in_memory().await.unwrap();
        app.history().create_new_chain(new_chain()).await.unwrap();

        let info = app.storage_info().await.unwrap();
        assert_eq!(info.backend, "document");
        assert_eq!(info.migration, Some(MigrationOutcome::SourceEmpty));
        assert!(info.keys >= 1);
        assert!(info.data_dir.is_none());
    }
}
