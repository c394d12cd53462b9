//! Implementation of the `init` command.
//!
//! Creates the `.promptkit/` directory with a default configuration and an
//! empty data directory.

use crate::config::{BackendSetting, PromptkitConfig, CONFIG_FILE_NAME, PROMPTKIT_DIR_NAME};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Name of the gitignore file within .promptkit
pub const GITIGNORE_FILE_NAME: &str = ".gitignore";

/// Maximum directory depth to traverse when searching for the project root
pub const MAX_TRAVERSAL_DEPTH: usize = 256;

const GITIGNORE_CONTENT: &str = "\
# Prompt history is personal; keep it out of version control
data/
";

/// Result of the init command
#[derive(Debug)]
pub struct InitResult {
    /// Path to the created .promptkit directory
    pub promptkit_dir: PathBuf,
    /// Path to the created config file
    pub config_file: PathBuf,
    /// Path to the created data directory
    pub data_dir: PathBuf,
    /// Path to the created gitignore file
    pub gitignore_file: PathBuf,
    /// Backend written to the configuration
    pub backend: BackendSetting,
}

/// Initialize a new promptkit project in the given directory.
///
/// # Errors
///
/// Returns an error if:
/// - The `.promptkit/` directory already exists
/// - File system operations fail
pub async fn init(base_dir: &Path, backend: Option<BackendSetting>) -> Result<InitResult> {
    let promptkit_dir = base_dir.join(PROMPTKIT_DIR_NAME);

    if fs::try_exists(&promptkit_dir).await? {
        return Err(Error::Config(format!(
            "Promptkit is already initialized in this directory. Found existing '{PROMPTKIT_DIR_NAME}'"
        )));
    }

    fs::create_dir_all(&promptkit_dir).await?;

    let config = PromptkitConfig::with_backend(backend.unwrap_or_default());
    let config_file = promptkit_dir.join(CONFIG_FILE_NAME);
    config.save(&config_file).await?;

    let data_dir = base_dir.join(&config.storage.data_dir);
    fs::create_dir_all(&data_dir).await?;

    let gitignore_file = promptkit_dir.join(GITIGNORE_FILE_NAME);
    fs::write(&gitignore_file, GITIGNORE_CONTENT).await?;

    tracing::info!(dir = %promptkit_dir.display(), backend = %config.storage.backend, "Initialized project");

    Ok(InitResult {
        promptkit_dir,
        config_file,
        data_dir,
        gitignore_file,
        backend: config.storage.backend,
    })
}

/// Check if a directory has been initialized with promptkit.
pub fn is_initialized(base_dir: &Path) -> bool {
    base_dir.join(PROMPTKIT_DIR_NAME).is_dir()
}

/// Find the project root by searching up the directory tree.
///
/// Returns the directory containing `.promptkit/`, or `None` if none is found
/// within [`MAX_TRAVERSAL_DEPTH`] levels.
pub fn find_promptkit_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    let mut depth = 0;

    loop {
        if is_initialized(&current) {
            return Some(current);
        }

        depth += 1;
        if depth > MAX_TRAVERSAL_DEPTH || !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_directory_structure() {
        let temp_dir = TempDir::new().unwrap();

        let result = init(temp_dir.path(), None).await.unwrap();

        assert!(result.promptkit_dir.is_dir());
        assert!(result.config_file.exists());
        assert!(result.data_dir.is_dir());
        assert!(result.gitignore_file.exists());
        assert_eq!(result.backend, BackendSetting::Auto);
    }

    #[rstest]
    #[case::memory(BackendSetting::Memory)]
    #[case::local(BackendSetting::Local)]
    #[case::document(BackendSetting::Document)]
    #[tokio::test]
    async fn test_init_records_backend(#[case] backend: BackendSetting) {
        let temp_dir = TempDir::new().unwrap();

        let result = init(temp_dir.path(), Some(backend)).await.unwrap();

        let config = PromptkitConfig::load(&result.config_file).await.unwrap();
        assert_eq!(config.storage.backend, backend);
    }

    #[tokio::test]
    async fn test_init_fails_if_already_initialized() {
        let temp_dir = TempDir::new().unwrap();

        init(temp_dir.path(), None).await.unwrap();

        let err_msg = init(temp_dir.path(), None)
            .await
            .unwrap_err()
            .to_string()
            .to_lowercase();
        assert!(err_msg.contains("already initialized"));
    }

    #[tokio::test]
    async fn test_init_gitignores_data() {
        let temp_dir = TempDir::new().unwrap();

        let result = init(temp_dir.path(), None).await.unwrap();

        let content = tokio::fs::read_to_string(&result.gitignore_file)
            .await
            .unwrap();
        assert!(content.contains("data/"));
    }

    #[test]
    fn test_is_initialized() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!is_initialized(temp_dir.path()));

        std::fs::create_dir(temp_dir.path().join(PROMPTKIT_DIR_NAME)).unwrap();
        assert!(is_initialized(temp_dir.path()));
    }

    #[test]
    fn test_find_root_in_parent_dir() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join(PROMPTKIT_DIR_NAME)).unwrap();

        let sub_dir = temp_dir.path().join("sub").join("nested");
        std::fs::create_dir_all(&sub_dir).unwrap();

        assert_eq!(
            find_promptkit_root(&sub_dir),
            Some(temp_dir.path().to_path_buf())
        );
    }

    #[test]
    fn test_find_root_not_found() {
        let temp_dir = TempDir::new().unwrap();
        assert!(find_promptkit_root(temp_dir.path()).is_none());
    }
}
