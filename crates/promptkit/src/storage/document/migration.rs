//! One-time migration from the local store into the document database.
//!
//! The [`MigrationCoordinator`] is shared by every document provider in the
//! process. Its outcome is an awaitable once-cell, so providers constructed
//! concurrently all wait on the same run instead of racing. A completion flag
//! in the target's meta table keeps a later process from migrating again.
//!
//! Migration never blocks normal operation. A failure is logged, the flag
//! stays unset so the next process retries, and the document backend keeps
//! serving whatever it already holds.

use super::db::DocumentDb;
use crate::error::{Error, Result};
use crate::storage::BasicStorage;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Meta key recording that migration has completed.
pub const MIGRATION_FLAG_KEY: &str = "local_storage_migration_completed";

/// What a migration attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MigrationOutcome {
    /// Copied `keys` entries from the source.
    Migrated {
        /// Number of keys copied.
        keys: usize,
    },
    /// The completion flag was already set.
    AlreadyCompleted,
    /// The target already held data; nothing was copied.
    TargetNotEmpty,
    /// The source held no data.
    SourceEmpty,
    /// The attempt failed and will be retried by the next process.
    Failed {
        /// Why it failed.
        reason: String,
    },
}

impl MigrationOutcome {
    /// Whether the completion flag is now set.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Runs migration at most once per process.
#[derive(Debug, Default)]
pub struct MigrationCoordinator {
    outcome: OnceCell<MigrationOutcome>,
}

impl MigrationCoordinator {
    /// Creates a coordinator that has not run yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Migrates `source` into `target` unless this coordinator already has.
    ///
    /// Concurrent callers await the same attempt and see the same outcome.
    pub async fn ensure_migrated(
        &self,
        source: &dyn BasicStorage,
        target: &DocumentDb,
    ) -> MigrationOutcome {
        self.outcome
            .get_or_init(|| async {
                match migrate(source, target).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(
                            error = %e,
                            "Migration from {} failed; continuing without it",
                            source.backend_name()
                        );
                        MigrationOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            })
            .await
            .clone()
    }

    /// The outcome, once an attempt has finished.
    #[must_use]
    pub fn outcome(&self) -> Option<MigrationOutcome> {
        self.outcome.get().cloned()
    }
}

/// Copies every key from `source` into `target` in one transaction.
///
/// Skips the copy when the completion flag is set or the target already holds
/// records. Sets the flag on every path except failure.
///
/// # Errors
///
/// Returns [`Error::Migration`] if the source cannot be read or the target
/// transaction fails. Nothing is written in that case.
pub async fn migrate(source: &dyn BasicStorage, target: &DocumentDb) -> Result<MigrationOutcome> {
    if target.meta(MIGRATION_FLAG_KEY).await.is_some() {
        debug!("Migration already completed");
        return Ok(MigrationOutcome::AlreadyCompleted);
    }

    let keys = source
        .list_keys()
        .await
        .map_err(|e| Error::Migration(format!("listing source keys: {e}")))?;
    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        let value = source
            .get_item(&key)
            .await
            .map_err(|e| Error::Migration(format!("reading '{key}': {e}")))?;
        if let Some(value) = value {
            entries.push((key, value));
        }
    }

    let completed_at = chrono::Utc::now().to_rfc3339();
    let outcome = target
        .transaction(move |tx| {
            if tx.meta(MIGRATION_FLAG_KEY).is_some() {
                return Ok(MigrationOutcome::AlreadyCompleted);
            }
            let outcome = if !tx.is_empty() {
                MigrationOutcome::TargetNotEmpty
            } else if entries.is_empty() {
                MigrationOutcome::SourceEmpty
            } else {
                let keys = entries.len();
                for (key, value) in entries {
                    tx.put(key, value);
                }
                MigrationOutcome::Migrated { keys }
            };
            tx.set_meta(MIGRATION_FLAG_KEY, completed_at);
            Ok(outcome)
        })
        .await
        .map_err(|e| Error::Migration(format!("writing target: {e}")))?;

    match &outcome {
        MigrationOutcome::Migrated { keys } => info!(keys, "Migrated local data"),
        other => debug!(?other, "Migration skipped"),
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorageProvider;

    async fn seeded_source() -> MemoryStorageProvider {
        let source = MemoryStorageProvider::new();
        source.set_item("prompt_history", "[]").await.unwrap();
        source.set_item("models", "{}").await.unwrap();
        source
    }

    #[tokio::test]
    async fn copies_every_key_and_sets_flag() {
        let source = seeded_source().await;
        let target = DocumentDb::in_memory();

        let outcome = migrate(&source, &target).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::Migrated { keys: 2 });
        assert_eq!(target.keys().await, vec!["models", "prompt_history"]);
        assert!(target.meta(MIGRATION_FLAG_KEY).await.is_some());
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let source = seeded_source().await;
        let target = DocumentDb::in_memory();
        migrate(&source, &target).await.unwrap();

        source.set_item("late", "x").await.unwrap();
        let outcome = migrate(&source, &target).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::AlreadyCompleted);
        assert!(target.get("late").await.is_none());
    }

    #[tokio::test]
    async fn non_empty_target_is_left_alone() {
        let source = seeded_source().await;
        let target = DocumentDb::in_memory();
        target
            .transaction(|tx| {
                tx.put("existing", "1");
                Ok(())
            })
            .await
            .unwrap();

        let outcome = migrate(&source, &target).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::TargetNotEmpty);
        assert_eq!(target.keys().await, vec!["existing"]);
        assert!(target.meta(MIGRATION_FLAG_KEY).await.is_some());
    }

    #[tokio::test]
    async fn source_failure_leaves_flag_unset() {
        let source = seeded_source().await;
        source.fail_reads(true);
        let target = DocumentDb::in_memory();

        let err = migrate(&source, &target).await.unwrap_err();

        assert!(matches!(err, Error::Migration(_)));
        assert!(target.is_empty().await);
        assert!(target.meta(MIGRATION_FLAG_KEY).await.is_none());
    }

    #[tokio::test]
    async fn coordinator_memoizes_failure_within_process() {
        let source = seeded_source().await;
        source.fail_reads(true);
        let target = DocumentDb::in_memory();
        let coordinator = MigrationCoordinator::new();

        let first = coordinator.ensure_migrated(&source, &target).await;
        source.fail_reads(false);
        let second = coordinator.ensure_migrated(&source, &target).await;

        assert!(!first.is_complete());
        assert_eq!(first, second);

        // A fresh coordinator, as in the next process, retries.
        let retry = MigrationCoordinator::new()
            .ensure_migrated(&source, &target)
            .await;
        assert_eq!(retry, MigrationOutcome::Migrated { keys: 2 });
    }
}
