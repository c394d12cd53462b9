//! Migration from the local store into the document store.

use promptkit::history::{HISTORY_STORAGE_KEY, HistoryManager};
use promptkit::storage::{
    BasicStorage, DocumentDb, LocalStorageProvider, LockConfig, MemoryStorageProvider,
    MigrationCoordinator, MigrationOutcome, StorageFactory, StorageKind, StorageOptions,
    StorageProvider, document::MIGRATION_FLAG_KEY, document::migrate,
};
use std::sync::Arc;
use tempfile::TempDir;

mod common;
use common::new_chain;

async fn seeded_local() -> LocalStorageProvider {
    let local = LocalStorageProvider::in_memory(None, LockConfig::default());
    local.set_item(HISTORY_STORAGE_KEY, "[]").await.unwrap();
    local.set_item("settings", "{\"theme\":\"dark\"}").await.unwrap();
    local
}

#[tokio::test]
async fn sequential_runs_copy_once() {
    let source = seeded_local().await;
    let target = DocumentDb::in_memory();

    let first = migrate(&source, &target).await.unwrap();
    let second = migrate(&source, &target).await.unwrap();

    assert_eq!(first, MigrationOutcome::Migrated { keys: 2 });
    assert_eq!(second, MigrationOutcome::AlreadyCompleted);
    assert_eq!(target.keys().await, vec!["prompt_history", "settings"]);
    assert!(target.meta(MIGRATION_FLAG_KEY).await.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_copy_once() {
    let source: Arc<dyn BasicStorage> = Arc::new(seeded_local().await);
    let target = Arc::new(DocumentDb::in_memory());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let source = Arc::clone(&source);
            let target = Arc::clone(&target);
            tokio::spawn(async move { migrate(source.as_ref(), &target).await })
        })
        .collect();

    let mut migrated = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            MigrationOutcome::Migrated { keys } => {
                assert_eq!(keys, 2);
                migrated += 1;
            }
            MigrationOutcome::AlreadyCompleted => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(migrated, 1);
    assert_eq!(target.keys().await.len(), 2);
}

#[tokio::test]
async fn failed_migration_is_retried_by_next_coordinator() {
    let source = MemoryStorageProvider::new();
    source.set_item("k", "v").await.unwrap();
    source.fail_reads(true);
    let target = DocumentDb::in_memory();

    let first = MigrationCoordinator::new();
    let outcome = first.ensure_migrated(&source, &target).await;
    assert!(matches!(outcome, MigrationOutcome::Failed { .. }));
    assert!(target.meta(MIGRATION_FLAG_KEY).await.is_none());

    source.fail_reads(false);
    // Same coordinator keeps its answer for the rest of the process.
    assert!(matches!(
        first.ensure_migrated(&source, &target).await,
        MigrationOutcome::Failed { .. }
    ));

    let next = MigrationCoordinator::new();
    assert_eq!(
        next.ensure_migrated(&source, &target).await,
        MigrationOutcome::Migrated { keys: 1 }
    );
}

#[tokio::test]
async fn history_written_locally_appears_in_document_store() {
    let dir = TempDir::new().unwrap();
    let options = StorageOptions {
        data_dir: Some(dir.path().to_path_buf()),
        ..StorageOptions::default()
    };

    // An earlier run that only had the local backend.
    let chain = {
        let factory = StorageFactory::new(options.clone());
        let local: Arc<dyn StorageProvider> = factory.create(StorageKind::Local).await.unwrap();
        HistoryManager::new(local)
            .create_new_chain(new_chain("legacy"))
            .await
            .unwrap()
    };

    let factory = StorageFactory::new(options);
    let default: Arc<dyn StorageProvider> = factory.create_default().await.unwrap();
    assert_eq!(default.backend_name(), "document");

    let history = HistoryManager::new(default);
    let migrated = history.get_chain(&chain.chain_id).await.unwrap();
    assert_eq!(migrated, chain);
    assert_eq!(
        factory.migration_outcome().await,
        Some(MigrationOutcome::Migrated { keys: 1 })
    );

    // A third run finds the flag and copies nothing.
    let again = StorageFactory::new(StorageOptions {
        data_dir: Some(dir.path().to_path_buf()),
        ..StorageOptions::default()
    });
    again.create_default().await.unwrap().list_keys().await.unwrap();
    assert_eq!(
        again.migration_outcome().await,
        Some(MigrationOutcome::AlreadyCompleted)
    );
}
