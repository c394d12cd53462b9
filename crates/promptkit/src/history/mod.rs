//! Prompt history and version chains.
//!
//! [`HistoryManager`] keeps every [`PromptRecord`] in one JSON array under
//! [`HISTORY_STORAGE_KEY`], newest first, capped at `max_records`. Chains
//! are derived from that list on every read (see [`chain`]).
//!
//! Every mutation is a single [`update_data`] call: the modifier checks the
//! invariants (unique ids, chain exists, capacity) against the snapshot it is
//! given and produces the next snapshot. Concurrent writers therefore cannot
//! interleave between a check and the write that depends on it.
//!
//! [`update_data`]: crate::storage::StorageProviderExt::update_data

pub mod chain;

pub use chain::{build_chain, group_chains, walk_iteration_chain};

use crate::domain::{
    ImportFailure, ImportReport, NewChain, NewIteration, PromptRecord, PromptRecordChain,
    RecordType,
};
use crate::error::{Error, Result};
use crate::storage::{StorageProvider, StorageProviderExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Storage key owning the record list.
pub const HISTORY_STORAGE_KEY: &str = "prompt_history";

/// Default capacity of the record list.
pub const DEFAULT_MAX_RECORDS: usize = 50;

/// Records, chains and lineage over a [`StorageProvider`].
#[derive(Clone)]
pub struct HistoryManager {
    storage: Arc<dyn StorageProvider>,
    max_records: usize,
}

impl std::fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryManager")
            .field("storage", &self.storage.backend_name())
            .field("max_records", &self.max_records)
            .finish()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Prepends `record`, then evicts the oldest entries beyond `max_records`.
fn insert_record(
    records: &mut Vec<PromptRecord>,
    record: PromptRecord,
    max_records: usize,
) -> Result<()> {
    if records.iter().any(|r| r.id == record.id) {
        return Err(Error::DuplicateRecord(record.id));
    }
    records.insert(0, record);
    if records.len() > max_records {
        debug!(evicted = records.len() - max_records, "Evicting oldest records");
        records.truncate(max_records);
    }
    Ok(())
}

impl HistoryManager {
    /// Creates a manager with the default capacity.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self::with_max_records(storage, DEFAULT_MAX_RECORDS)
    }

    /// Creates a manager keeping at most `max_records` records (minimum 1).
    #[must_use]
    pub fn with_max_records(storage: Arc<dyn StorageProvider>, max_records: usize) -> Self {
        Self {
            storage,
            max_records: max_records.max(1),
        }
    }

    /// The capacity of the record list.
    #[must_use]
    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// The storage this manager writes to.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.storage
    }

    async fn load(&self) -> Result<Vec<PromptRecord>> {
        Ok(self
            .storage
            .get_json(HISTORY_STORAGE_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Validates and stores `record` as the newest entry.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if the record is malformed (nothing is written)
    /// - [`Error::DuplicateRecord`] if its id is taken (nothing is written)
    /// - [`Error::Storage`] / [`Error::LockTimeout`] on backend faults
    pub async fn add_record(&self, record: PromptRecord) -> Result<PromptRecord> {
        record.validate()?;
        let max = self.max_records;
        let stored = record.clone();
        self.storage
            .update_data(HISTORY_STORAGE_KEY, move |current: Option<Vec<PromptRecord>>| {
                let mut records = current.unwrap_or_default();
                insert_record(&mut records, stored, max)?;
                Ok(records)
            })
            .await?;
        debug!(id = %record.id, chain_id = %record.chain_id, "Added record");
        Ok(record)
    }

    /// Returns every record, newest first by timestamp.
    ///
    /// A snapshot only. Do not use it to decide a later write; use the
    /// mutating operations, which check against the stored list atomically.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the list cannot be read or decoded.
    pub async fn get_records(&self) -> Result<Vec<PromptRecord>> {
        let mut records = self.load().await?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Returns the record with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] if absent.
    pub async fn get_record(&self, id: &str) -> Result<PromptRecord> {
        self.load()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))
    }

    /// Removes the record with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] if absent; nothing is written then.
    pub async fn delete_record(&self, id: &str) -> Result<()> {
        let target = id.to_string();
        self.storage
            .update_data(HISTORY_STORAGE_KEY, move |current: Option<Vec<PromptRecord>>| {
                let mut records = current.unwrap_or_default();
                let Some(pos) = records.iter().position(|r| r.id == target) else {
                    return Err(Error::RecordNotFound(target));
                };
                records.remove(pos);
                Ok(records)
            })
            .await?;
        debug!(id, "Deleted record");
        Ok(())
    }

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub async fn clear_history(&self) -> Result<()> {
        self.storage
            .update_data(HISTORY_STORAGE_KEY, |_: Option<Vec<PromptRecord>>| Ok(Vec::new()))
            .await?;
        info!("Cleared prompt history");
        Ok(())
    }

    /// Starts a new chain whose root is built from `params`.
    ///
    /// # Errors
    ///
    /// Same as [`add_record`](Self::add_record).
    pub async fn create_new_chain(&self, params: NewChain) -> Result<PromptRecordChain> {
        let chain_id = new_id();
        let root = PromptRecord {
            id: new_id(),
            chain_id: chain_id.clone(),
            version: 1,
            previous_id: None,
            timestamp: now_millis(),
            original_prompt: params.original_prompt,
            optimized_prompt: params.optimized_prompt,
            record_type: RecordType::Optimize,
            model_key: params.model_key,
            model_name: params.model_name,
            template_id: params.template_id,
            iteration_note: None,
            metadata: params.metadata,
        };
        self.add_record(root).await?;
        self.get_chain(&chain_id).await
    }

    /// Appends a version to an existing chain and returns the updated chain.
    ///
    /// The chain tip is resolved inside the same atomic update that inserts
    /// the new version, so concurrent iterations get distinct versions.
    ///
    /// # Errors
    ///
    /// - [`Error::ChainNotFound`] if the chain does not exist
    /// - [`Error::Corrupted`] if the chain has no root
    /// - [`Error::Validation`] if the new record is malformed or the chain's
    ///   version counter is exhausted
    pub async fn add_iteration(&self, params: NewIteration) -> Result<PromptRecordChain> {
        let max = self.max_records;
        let id = new_id();
        let timestamp = now_millis();

        let chain = self
            .storage
            .update_data_with(HISTORY_STORAGE_KEY, move |current: Option<Vec<PromptRecord>>| {
                let mut records = current.unwrap_or_default();
                let tip = build_chain(&records, &params.chain_id)?.current_record;
                let version = tip.version.checked_add(1).ok_or_else(|| {
                    Error::Validation(format!(
                        "chain '{}' has reached the maximum version {}",
                        params.chain_id,
                        u32::MAX
                    ))
                })?;

                let record = PromptRecord {
                    id,
                    chain_id: params.chain_id,
                    version,
                    previous_id: Some(tip.id),
                    timestamp,
                    original_prompt: params.original_prompt,
                    optimized_prompt: params.optimized_prompt,
                    record_type: RecordType::Iterate,
                    model_key: params.model_key,
                    model_name: params.model_name,
                    template_id: params.template_id,
                    iteration_note: params.iteration_note,
                    metadata: params.metadata,
                };
                record.validate()?;
                let chain_id = record.chain_id.clone();
                insert_record(&mut records, record, max)?;

                let chain = build_chain(&records, &chain_id)?;
                Ok((records, chain))
            })
            .await?;

        debug!(
            chain_id = %chain.chain_id,
            version = chain.current_record.version,
            "Added iteration"
        );
        Ok(chain)
    }

    /// Returns the chain `chain_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::ChainNotFound`] if no record belongs to it
    /// - [`Error::Corrupted`] if it has no version-1 record
    pub async fn get_chain(&self, chain_id: &str) -> Result<PromptRecordChain> {
        build_chain(&self.load().await?, chain_id)
    }

    /// Returns every chain, most recently updated first.
    ///
    /// A chain whose version-1 record is gone (capacity eviction drops the
    /// oldest records first) is left out with a warning instead of failing
    /// the listing. [`get_chain`](Self::get_chain) on such a chain still
    /// reports [`Error::Corrupted`].
    ///
    /// # Errors
    ///
    /// Returns a storage error if the list cannot be read.
    pub async fn get_all_chains(&self) -> Result<Vec<PromptRecordChain>> {
        Ok(group_chains(&self.load().await?))
    }

    /// Returns the lineage ending at `record_id`, root first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the list cannot be read.
    pub async fn get_iteration_chain(&self, record_id: &str) -> Result<Vec<PromptRecord>> {
        Ok(walk_iteration_chain(&self.load().await?, record_id))
    }

    /// Removes every record of `chain_id` and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChainNotFound`] if no record belongs to the chain.
    pub async fn delete_chain(&self, chain_id: &str) -> Result<usize> {
        let target = chain_id.to_string();
        let removed = self
            .storage
            .update_data_with(HISTORY_STORAGE_KEY, move |current: Option<Vec<PromptRecord>>| {
                let mut records = current.unwrap_or_default();
                let before = records.len();
                records.retain(|r| r.chain_id != target);
                let removed = before - records.len();
                if removed == 0 {
                    return Err(Error::ChainNotFound(target));
                }
                Ok((records, removed))
            })
            .await?;
        debug!(chain_id, removed, "Deleted chain");
        Ok(removed)
    }

    /// Returns the stored list as-is (newest inserted first).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the list cannot be read.
    pub async fn export_records(&self) -> Result<Vec<PromptRecord>> {
        self.load().await
    }

    /// Stores `incoming` records in one update, skipping bad ones.
    ///
    /// Records are inserted oldest first, so after capacity eviction the
    /// newest survive. Invalid records and ids already present (in storage or
    /// earlier in `incoming`) are skipped and listed in the report.
    ///
    /// # Errors
    ///
    /// Only backend faults fail the whole import.
    pub async fn import_records(&self, mut incoming: Vec<PromptRecord>) -> Result<ImportReport> {
        let max = self.max_records;
        incoming.sort_by_key(|r| r.timestamp);

        let report = self
            .storage
            .update_data_with(HISTORY_STORAGE_KEY, move |current: Option<Vec<PromptRecord>>| {
                let mut records = current.unwrap_or_default();
                let mut seen: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
                let mut report = ImportReport::default();

                for record in incoming {
                    if let Err(e) = record.validate() {
                        report.skipped.push(ImportFailure {
                            id: record.id,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                    if !seen.insert(record.id.clone()) {
                        report.skipped.push(ImportFailure {
                            reason: Error::DuplicateRecord(record.id.clone()).to_string(),
                            id: record.id,
                        });
                        continue;
                    }
                    records.insert(0, record);
                    report.imported += 1;
                }
                records.truncate(max);
                Ok((records, report))
            })
            .await?;

        if report.skipped.is_empty() {
            info!(imported = report.imported, "Imported records");
        } else {
            warn!(
                imported = report.imported,
                skipped = report.skipped.len(),
                "Import finished with skipped records"
            );
        }
        Ok(report)
    }
}
