//! Atomic replacement of JSONL table files.
//!
//! A table is never rewritten in place. New contents go to a sibling
//! `<name>.tmp` file which is flushed and then renamed over the target. On
//! POSIX filesystems the rename is atomic, so readers observe either the old
//! table or the new one and a crash mid-write leaves the old table intact.

use crate::{JsonlWriter, Result};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs::File;

/// Atomically replaces `path` with one JSON line per value.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be written or the final
/// rename fails. On failure the original file is left unchanged.
///
/// # Examples
///
/// ```no_run
/// use promptkit_jsonl::write_jsonl_atomic;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Row {
///     key: String,
///     value: String,
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let rows = vec![Row { key: "prompt_history".into(), value: "[]".into() }];
/// write_jsonl_atomic("records.jsonl", &rows).await?;
/// # Ok(())
/// # }
/// ```
pub async fn write_jsonl_atomic<T, P>(path: P, values: &[T]) -> Result<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    write_jsonl_atomic_iter(path, values.iter()).await
}

/// Iterator form of [`write_jsonl_atomic`].
///
/// # Errors
///
/// See [`write_jsonl_atomic`].
pub async fn write_jsonl_atomic_iter<T, I, P>(path: P, values: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let temp_path = make_temp_path(path);

    if let Err(e) = write_to_temp_file(&temp_path, values).await {
        // Best-effort cleanup of temp file
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

/// Appends `.tmp` to the file name, keeping any existing extension.
fn make_temp_path(path: &Path) -> PathBuf {
    let mut temp_path = path.to_path_buf();
    let new_extension = match path.extension() {
        Some(ext) => {
            let mut new_ext = ext.to_os_string();
            new_ext.push(".tmp");
            new_ext
        }
        None => OsString::from("tmp"),
    };
    temp_path.set_extension(new_extension);
    temp_path
}

async fn write_to_temp_file<T, I>(temp_path: &Path, values: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let file = File::create(temp_path).await?;
    let mut writer = JsonlWriter::new(file);
    writer.write_all(values).await?;
    writer.flush().await?;
    writer.into_inner().into_inner().sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Row {
        key: String,
        value: String,
    }

    fn row(key: &str, value: &str) -> Row {
        Row {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn make_temp_path_with_extension() {
        let temp = make_temp_path(Path::new("/data/records.jsonl"));
        assert_eq!(temp, Path::new("/data/records.jsonl.tmp"));
    }

    #[test]
    fn make_temp_path_without_extension() {
        let temp = make_temp_path(Path::new("/data/records"));
        assert_eq!(temp, Path::new("/data/records.tmp"));
    }

    #[tokio::test]
    async fn atomic_write_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("records.jsonl");
        tokio::fs::write(&target, "stale contents\n").await.unwrap();

        write_jsonl_atomic(&target, &[row("prompt_history", "[]")])
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&target).await.unwrap();
        assert_eq!(contents.trim(), r#"{"key":"prompt_history","value":"[]"}"#);
        assert!(!dir.path().join("records.jsonl.tmp").exists());
    }

    #[tokio::test]
    async fn atomic_write_empty_table_creates_empty_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("meta.jsonl");

        write_jsonl_atomic::<Row, _>(&target, &[]).await.unwrap();

        let metadata = tokio::fs::metadata(&target).await.unwrap();
        assert_eq!(metadata.len(), 0);
    }

    #[tokio::test]
    async fn failed_write_leaves_original_untouched() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("missing-dir").join("records.jsonl");

        let result = write_jsonl_atomic(&target, &[row("k", "v")]).await;
        assert!(result.is_err());
        assert!(!target.exists());
    }
}
