//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use promptkit::domain::{NewChain, NewIteration, PromptRecord, RecordType};
use promptkit::storage::{StorageAdapter, StorageFactory, StorageKind, StorageOptions};
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;
use tempfile::TempDir;

/// Run the promptkit binary in the specified directory
pub fn run_promptkit_in_dir(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_promptkit"))
        .args(args)
        .current_dir(dir)
        .env("NO_COLOR", "1")
        .env("RUST_LOG", "off")
        .output()
        .expect("Failed to execute promptkit binary")
}

/// Run the binary and parse its stdout as JSON, asserting success
pub fn run_json(dir: &Path, args: &[&str]) -> serde_json::Value {
    let mut full = vec!["--json"];
    full.extend_from_slice(args);
    let output = run_promptkit_in_dir(dir, &full);
    assert!(
        output.status.success(),
        "promptkit {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

/// Storage built by a fresh factory. The temp dir, if any, must outlive it.
pub struct TestStorage {
    pub factory: StorageFactory,
    pub storage: Arc<StorageAdapter>,
    pub dir: Option<TempDir>,
}

/// Builds `kind` in memory, or under a fresh temp dir when `on_disk`.
pub async fn storage(kind: StorageKind, on_disk: bool) -> TestStorage {
    let dir = on_disk.then(|| TempDir::new().expect("Failed to create temp directory"));
    let factory = StorageFactory::new(StorageOptions {
        data_dir: dir.as_ref().map(|d| d.path().to_path_buf()),
        ..StorageOptions::default()
    });
    let storage = factory.create(kind).await.expect("storage");
    TestStorage {
        factory,
        storage,
        dir,
    }
}

pub fn new_chain(prompt: &str) -> NewChain {
    NewChain {
        original_prompt: prompt.to_string(),
        optimized_prompt: format!("{prompt} (optimized)"),
        model_key: "gpt-4o".to_string(),
        model_name: Some("GPT-4o".to_string()),
        template_id: "general-optimize".to_string(),
        metadata: None,
    }
}

pub fn new_iteration(chain_id: &str, note: &str) -> NewIteration {
    NewIteration {
        chain_id: chain_id.to_string(),
        original_prompt: "previous version".to_string(),
        optimized_prompt: format!("refined: {note}"),
        iteration_note: Some(note.to_string()),
        model_key: "gpt-4o".to_string(),
        model_name: None,
        template_id: "iterate".to_string(),
        metadata: None,
    }
}

/// A valid root record with a fixed id and timestamp
pub fn root_record(id: &str, timestamp: i64) -> PromptRecord {
    PromptRecord {
        id: id.to_string(),
        chain_id: format!("chain-{id}"),
        version: 1,
        previous_id: None,
        timestamp,
        original_prompt: "draft".to_string(),
        optimized_prompt: "Polished draft.".to_string(),
        record_type: RecordType::Optimize,
        model_key: "gpt-4o".to_string(),
        model_name: None,
        template_id: "general-optimize".to_string(),
        iteration_note: None,
        metadata: None,
    }
}
