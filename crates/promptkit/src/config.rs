//! Project configuration stored in `.promptkit/config.yaml`.
//!
//! Every section is optional in the file; missing keys take their defaults.
//!
//! ```yaml
//! storage:
//!   backend: auto
//!   data-dir: .promptkit/data
//! history:
//!   max-records: 50
//! locks:
//!   timeout-ms: 30000
//! ```

use crate::error::{Error, Result};
use crate::history::DEFAULT_MAX_RECORDS;
use crate::storage::{LockConfig, StorageKind, StorageOptions, DEFAULT_LOCK_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Name of the promptkit directory
pub const PROMPTKIT_DIR_NAME: &str = ".promptkit";

/// Name of the configuration file
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default data directory, relative to the project root
pub const DEFAULT_DATA_DIR: &str = ".promptkit/data";

/// Which backend the application uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSetting {
    /// Document backend, falling back to local if it cannot be opened
    #[default]
    Auto,
    /// In-memory; nothing survives the process
    Memory,
    /// Single JSON file
    Local,
    /// JSONL tables with transactions
    Document,
}

impl BackendSetting {
    /// The explicit backend kind, or `None` for [`BackendSetting::Auto`].
    #[must_use]
    pub fn kind(self) -> Option<StorageKind> {
        match self {
            Self::Auto => None,
            Self::Memory => Some(StorageKind::Memory),
            Self::Local => Some(StorageKind::Local),
            Self::Document => Some(StorageKind::Document),
        }
    }
}

impl fmt::Display for BackendSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "{kind}"),
            None => write!(f, "auto"),
        }
    }
}

/// `storage` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StorageSection {
    /// Backend selection
    pub backend: BackendSetting,

    /// Data directory, relative to the project root
    pub data_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: BackendSetting::Auto,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

/// `history` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HistorySection {
    /// Records kept before the oldest are evicted
    pub max_records: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

/// `locks` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LockSection {
    /// Lock wait and hold timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            timeout_ms: u64::try_from(DEFAULT_LOCK_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Contents of `config.yaml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptkitConfig {
    /// Storage configuration
    pub storage: StorageSection,

    /// History configuration
    pub history: HistorySection,

    /// Lock configuration
    pub locks: LockSection,
}

impl PromptkitConfig {
    /// Default configuration using `backend`.
    #[must_use]
    pub fn with_backend(backend: BackendSetting) -> Self {
        let mut config = Self::default();
        config.storage.backend = backend;
        config
    }

    /// Load and validate configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Config`]
    /// if it is not valid YAML or fails validation.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.history.max_records == 0 {
            return Err(Error::Config(
                "history.max-records must be at least 1".to_string(),
            ));
        }
        if self.locks.timeout_ms == 0 {
            return Err(Error::Config(
                "locks.timeout-ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Lock timeouts derived from `locks.timeout-ms`.
    #[must_use]
    pub fn lock_config(&self) -> LockConfig {
        LockConfig::uniform(Duration::from_millis(self.locks.timeout_ms))
    }

    /// Factory options for a project rooted at `root_dir`.
    #[must_use]
    pub fn storage_options(&self, root_dir: &Path) -> StorageOptions {
        StorageOptions {
            data_dir: Some(root_dir.join(&self.storage.data_dir)),
            lock: self.lock_config(),
            ..StorageOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let config = PromptkitConfig::default();
        assert_eq!(config.storage.backend, BackendSetting::Auto);
        assert_eq!(config.history.max_records, 50);
        assert_eq!(config.locks.timeout_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: PromptkitConfig =
            serde_yaml::from_str("history:\n  max-records: 5\n").unwrap();
        assert_eq!(config.history.max_records, 5);
        assert_eq!(config.storage, StorageSection::default());
        assert_eq!(config.locks, LockSection::default());
    }

    #[test]
    fn keys_are_kebab_case() {
        let yaml = serde_yaml::to_string(&PromptkitConfig::default()).unwrap();
        assert!(yaml.contains("data-dir"));
        assert!(yaml.contains("max-records"));
        assert!(yaml.contains("timeout-ms"));
        assert!(yaml.contains("backend: auto"));
    }

    #[rstest]
    #[case::auto(BackendSetting::Auto, None)]
    #[case::memory(BackendSetting::Memory, Some(StorageKind::Memory))]
    #[case::document(BackendSetting::Document, Some(StorageKind::Document))]
    fn backend_setting_maps_to_kind(
        #[case] setting: BackendSetting,
        #[case] expected: Option<StorageKind>,
    ) {
        assert_eq!(setting.kind(), expected);
    }

    #[rstest]
    #[case::zero_records("history:\n  max-records: 0\n", "max-records")]
    #[case::zero_timeout("locks:\n  timeout-ms: 0\n", "timeout-ms")]
    fn validate_rejects_zero(#[case] yaml: &str, #[case] mentions: &str) {
        let config: PromptkitConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains(mentions)));
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = PromptkitConfig::with_backend(BackendSetting::Local);
        config.history.max_records = 7;

        config.save(&path).await.unwrap();
        assert_eq!(PromptkitConfig::load(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn load_rejects_bad_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "storage: [not, a, map]").unwrap();

        assert!(matches!(
            PromptkitConfig::load(&path).await,
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn storage_options_resolve_data_dir_against_root() {
        let config = PromptkitConfig::default();
        let options = config.storage_options(Path::new("/project"));
        assert_eq!(
            options.data_dir.as_deref(),
            Some(Path::new("/project/.promptkit/data"))
        );
        assert_eq!(options.lock, LockConfig::uniform(Duration::from_secs(30)));
    }
}
