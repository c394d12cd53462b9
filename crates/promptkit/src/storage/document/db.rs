//! Table store with native transactions.
//!
//! A [`DocumentDb`] holds two tables: `records` (one [`StorageRecord`] per
//! key) and `meta` (backend-private flags such as migration state). When
//! opened on a directory, each table is persisted as a JSONL file
//! (`records.jsonl`, `meta.jsonl`) and rewritten atomically on commit.
//!
//! # Transactions
//!
//! [`DocumentDb::transaction`] runs a closure against a private working copy
//! of the tables. Transactions are serialized. If the closure returns `Ok`,
//! the changed tables are persisted and the working copy replaces the live
//! tables; if the closure or persistence fails, the working copy is dropped
//! and nothing changes.

use crate::error::{Result, StorageError};
use crate::storage::StorageRecord;
use promptkit_jsonl::{read_jsonl_resilient, write_jsonl_atomic_iter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// File name of the records table.
pub const RECORDS_FILE: &str = "records.jsonl";

/// File name of the meta table.
pub const META_FILE: &str = "meta.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MetaRow {
    key: String,
    value: String,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    records: BTreeMap<String, StorageRecord>,
    meta: BTreeMap<String, String>,
}

/// Transactional key-value tables, optionally persisted to a directory.
#[derive(Debug)]
pub struct DocumentDb {
    tables: Mutex<Tables>,
    dir: Option<PathBuf>,
}

impl DocumentDb {
    /// Creates an ephemeral database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            dir: None,
        }
    }

    /// Opens the database persisted in `dir`, creating the directory if needed.
    ///
    /// Damaged lines in either table are skipped and logged.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created, or
    /// [`StorageError::Table`] if a table file exists but cannot be read.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(StorageError::from)?;

        let records: Vec<StorageRecord> = load_table(&dir.join(RECORDS_FILE)).await?;
        let meta: Vec<MetaRow> = load_table(&dir.join(META_FILE)).await?;

        let tables = Tables {
            records: records.into_iter().map(|r| (r.key.clone(), r)).collect(),
            meta: meta.into_iter().map(|m| (m.key, m.value)).collect(),
        };
        debug!(
            dir = %dir.display(),
            records = tables.records.len(),
            "Opened document database"
        );

        Ok(Self {
            tables: Mutex::new(tables),
            dir: Some(dir),
        })
    }

    /// The persistence directory, if any.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Returns the record stored under `key`.
    pub async fn get(&self, key: &str) -> Option<StorageRecord> {
        self.tables.lock().await.records.get(key).cloned()
    }

    /// Lists every record key in ascending order.
    pub async fn keys(&self) -> Vec<String> {
        self.tables.lock().await.records.keys().cloned().collect()
    }

    /// Whether the records table is empty.
    pub async fn is_empty(&self) -> bool {
        self.tables.lock().await.records.is_empty()
    }

    /// Returns a meta value.
    pub async fn meta(&self, key: &str) -> Option<String> {
        self.tables.lock().await.meta.get(key).cloned()
    }

    /// Runs `work` as one transaction.
    ///
    /// # Errors
    ///
    /// Returns the closure's error unchanged, or [`StorageError::Table`] if
    /// committing to disk fails. Either way no change is applied.
    pub async fn transaction<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R> + Send,
        R: Send,
    {
        let mut live = self.tables.lock().await;
        let mut working = live.clone();
        let mut tx = Transaction {
            tables: &mut working,
            records_dirty: false,
            meta_dirty: false,
        };

        let output = work(&mut tx)?;
        let (records_dirty, meta_dirty) = (tx.records_dirty, tx.meta_dirty);

        if let Some(dir) = &self.dir {
            if records_dirty {
                let rows: Vec<StorageRecord> = working.records.values().cloned().collect();
                persist_table(&dir.join(RECORDS_FILE), rows).await?;
            }
            if meta_dirty {
                let rows: Vec<MetaRow> = working
                    .meta
                    .iter()
                    .map(|(key, value)| MetaRow {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect();
                persist_table(&dir.join(META_FILE), rows).await?;
            }
        }

        *live = working;
        debug!(records_dirty, meta_dirty, "Committed transaction");
        Ok(output)
    }
}

/// Mutable view of the tables inside [`DocumentDb::transaction`].
#[derive(Debug)]
pub struct Transaction<'a> {
    tables: &'a mut Tables,
    records_dirty: bool,
    meta_dirty: bool,
}

impl Transaction<'_> {
    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tables.records.get(key).map(|r| r.value.as_str())
    }

    /// Stores `value` under `key`, stamping the record with the current time.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let record = StorageRecord::new(key, value);
        self.tables.records.insert(record.key.clone(), record);
        self.records_dirty = true;
    }

    /// Removes `key` if present.
    pub fn delete(&mut self, key: &str) {
        if self.tables.records.remove(key).is_some() {
            self.records_dirty = true;
        }
    }

    /// Removes every record. Meta entries are kept.
    pub fn clear(&mut self) {
        self.tables.records.clear();
        self.records_dirty = true;
    }

    /// Lists every record key.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.tables.records.keys().cloned().collect()
    }

    /// Whether the records table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.records.is_empty()
    }

    /// Returns a meta value.
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.tables.meta.get(key).map(String::as_str)
    }

    /// Sets a meta value.
    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tables.meta.insert(key.into(), value.into());
        self.meta_dirty = true;
    }
}

async fn load_table<T>(path: &Path) -> Result<Vec<T>>
where
    T: serde::de::DeserializeOwned,
{
    match tokio::fs::try_exists(path).await {
        Ok(true) => {}
        Ok(false) => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::from(e).into()),
    }

    let (rows, warnings) = read_jsonl_resilient(path)
        .await
        .map_err(|source| StorageError::Table {
            path: path.to_path_buf(),
            source,
        })?;
    for warning in &warnings {
        warn!(path = %path.display(), %warning, "Skipped damaged table row");
    }
    Ok(rows)
}

/// Rows are owned so the future stays `Send` across the write.
async fn persist_table<T>(path: &Path, rows: Vec<T>) -> Result<()>
where
    T: Serialize + Send,
{
    write_jsonl_atomic_iter(path, rows)
        .await
        .map_err(|source| StorageError::Table {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(())
}
