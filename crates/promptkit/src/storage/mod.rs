//! Storage abstraction layer for promptkit.
//!
//! Every manager in the crate persists through one contract, regardless of
//! which backend sits underneath:
//!
//! - **Memory**: bare in-process map exposing only the minimal contract
//! - **Local**: synchronous key-value store (in-memory map or one JSON file)
//!   serialized through a [`KeyedMutex`]
//! - **Document**: table store with native transactions, persisted as JSONL,
//!   that migrates data from the local store on first use
//!
//! # Architecture
//!
//! Backends implement [`BasicStorage`], the minimal get/set/remove/clear
//! contract. A backend that can do more says so through the capability
//! probes ([`BasicStorage::as_atomic_update`] and friends). The
//! [`StorageAdapter`] wraps any backend and presents the uniform
//! [`StorageProvider`] contract, synthesizing atomic updates with a
//! [`KeyedMutex`] when the backend has no native support.
//!
//! Consumers mutate data only through [`StorageProviderExt::update_data`],
//! which reads, modifies and writes one key as an indivisible step.
//!
//! # Example
//!
//! ```no_run
//! use promptkit::storage::{StorageFactory, StorageKind, StorageOptions, StorageProviderExt};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let factory = StorageFactory::new(StorageOptions::default());
//!     let storage = factory.create(StorageKind::Memory).await?;
//!
//!     let count: u64 = storage
//!         .update_data("counter", |current: Option<u64>| Ok(current.unwrap_or(0) + 1))
//!         .await?;
//!     println!("counter is now {count}");
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result, StorageError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

pub mod adapter;
pub mod document;
pub mod factory;
pub mod local;
pub mod lock;
pub mod memory;

pub use adapter::StorageAdapter;
pub use document::{DocumentDb, DocumentStorageProvider, MigrationCoordinator, MigrationOutcome};
pub use factory::{StorageFactory, StorageKind, StorageOptions};
pub use local::{FileKeyValueStore, KeyValueStore, LocalStorageProvider, MemoryKeyValueStore};
pub use lock::{KeyGuard, KeyedMutex, LockConfig, DEFAULT_LOCK_TIMEOUT};
pub use memory::MemoryStorageProvider;

/// Read-modify-write step over a raw stored value.
///
/// Receives the current value (`None` when the key is absent) and returns the
/// value to store. Returning an error aborts the update without writing.
pub type RawModifier = Box<dyn FnOnce(Option<String>) -> Result<String> + Send>;

/// The raw persistence unit of the document backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    /// Storage key.
    pub key: String,
    /// Opaque serialized payload owned by the caller.
    pub value: String,
    /// Last write time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl StorageRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// One operation in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum BatchOp {
    /// Store `value` under `key`.
    Set {
        /// Target key.
        key: String,
        /// Value to store.
        value: String,
    },
    /// Remove `key` if present.
    Remove {
        /// Target key.
        key: String,
    },
}

impl BatchOp {
    /// The key this operation touches.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Remove { key } => key,
        }
    }
}

/// Where a backend's atomic updates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Atomicity {
    /// The backend performs read-modify-write itself.
    Native,
    /// The adapter builds it from get/set under a key lock.
    Synthesized,
}

/// What a failed `batch_update` leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchSemantics {
    /// All operations apply or none do.
    Atomic,
    /// Operations apply in order; a failure leaves earlier ones applied.
    BestEffort,
}

/// Observational description of a storage provider.
///
/// Intended for diagnostics. Business logic relies on the contract of
/// [`StorageProvider`], never on these flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// `update_raw` is indivisible per key.
    pub supports_atomic: bool,
    /// `batch_update` is available.
    pub supports_batch: bool,
    /// Size limit of the backing store in bytes, if any.
    pub max_size: Option<u64>,
    /// Whether atomicity is native or synthesized.
    pub atomicity: Atomicity,
    /// Failure semantics of `batch_update`.
    pub batch: BatchSemantics,
}

/// Minimal contract every backend implements.
///
/// Implementations must be `Send + Sync`; they are shared behind `Arc`.
#[async_trait]
pub trait BasicStorage: Send + Sync {
    /// Short backend name for logs and diagnostics.
    fn backend_name(&self) -> &'static str;

    /// Returns the value stored under `key`, or `None`.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<()>;

    /// Removes every key.
    async fn clear_all(&self) -> Result<()>;

    /// Lists every stored key.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Size limit of the backing store in bytes, if any.
    fn max_size(&self) -> Option<u64> {
        None
    }

    /// Native atomic update support, if the backend has it.
    fn as_atomic_update(&self) -> Option<&dyn AtomicUpdate> {
        None
    }

    /// Native batch support, if the backend has it.
    fn as_batch_update(&self) -> Option<&dyn BatchUpdate> {
        None
    }

    /// Native all-or-nothing batch support, if the backend has it.
    fn as_atomic_batch(&self) -> Option<&dyn AtomicBatch> {
        None
    }
}

/// Indivisible read-modify-write on one key.
#[async_trait]
pub trait AtomicUpdate: Send + Sync {
    /// Reads `key`, applies `modifier`, writes the result and returns it.
    ///
    /// # Errors
    ///
    /// Errors returned by `modifier` propagate unchanged and nothing is
    /// written. Backend failures surface as [`Error::Storage`].
    async fn update_raw(&self, key: &str, modifier: RawModifier) -> Result<String>;
}

/// Sequential batch without an all-or-nothing guarantee.
#[async_trait]
pub trait BatchUpdate: Send + Sync {
    /// Applies `ops` in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failure. Operations before it remain applied.
    async fn batch_update(&self, ops: Vec<BatchOp>) -> Result<()>;
}

/// Batch that applies entirely or not at all.
#[async_trait]
pub trait AtomicBatch: Send + Sync {
    /// Applies `ops` as one transaction.
    ///
    /// # Errors
    ///
    /// On failure no operation is applied.
    async fn apply_atomically(&self, ops: Vec<BatchOp>) -> Result<()>;
}

/// The uniform contract every consumer depends on.
///
/// Usually obtained as an [`StorageAdapter`] from the [`StorageFactory`].
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Short backend name for logs and diagnostics.
    fn backend_name(&self) -> &'static str;

    /// Returns the value stored under `key`, or `None`.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`.
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key` if present.
    async fn remove_item(&self, key: &str) -> Result<()>;

    /// Removes every key.
    async fn clear_all(&self) -> Result<()>;

    /// Lists every stored key.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Indivisible read-modify-write on one key; returns the written value.
    ///
    /// Prefer [`StorageProviderExt::update_data`] for typed values.
    async fn update_raw(&self, key: &str, modifier: RawModifier) -> Result<String>;

    /// Applies `ops` in order.
    ///
    /// Whether a failure leaves earlier operations applied depends on the
    /// backend and is reported by [`Capabilities::batch`]. Callers that need
    /// all-or-nothing semantics use [`atomic_batch`](Self::atomic_batch).
    async fn batch_update(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// All-or-nothing batching, available only on transactional backends.
    fn atomic_batch(&self) -> Option<&dyn AtomicBatch>;

    /// Reports what this provider does natively.
    fn capabilities(&self) -> Capabilities;
}

/// Typed helpers over [`StorageProvider`], available on every provider.
#[async_trait]
pub trait StorageProviderExt: StorageProvider {
    /// Reads `key` and decodes it as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the stored value is not a
    /// valid `T`.
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_item(key).await? {
            Some(raw) => decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Atomically transforms the JSON value stored under `key`.
    ///
    /// `modifier` receives the decoded current value (`None` if absent) and
    /// returns the next value, which is encoded, written and returned.
    ///
    /// # Errors
    ///
    /// Errors returned by `modifier` propagate unchanged and nothing is
    /// written. Undecodable stored data and unencodable results surface as
    /// [`StorageError::Serialization`].
    async fn update_data<T, F>(&self, key: &str, modifier: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(Option<T>) -> Result<T> + Send + 'static,
    {
        let owned_key = key.to_string();
        let raw = self
            .update_raw(
                key,
                Box::new(move |current: Option<String>| {
                    let current = current
                        .map(|raw| decode::<T>(&owned_key, &raw))
                        .transpose()?;
                    let next = modifier(current)?;
                    encode(&owned_key, &next)
                }),
            )
            .await?;
        decode(key, &raw)
    }

    /// Like [`update_data`](Self::update_data), but the modifier also
    /// produces a result that is handed back once the write succeeds.
    ///
    /// # Errors
    ///
    /// Same as [`update_data`](Self::update_data).
    async fn update_data_with<T, R, F>(&self, key: &str, modifier: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        R: Send + 'static,
        F: FnOnce(Option<T>) -> Result<(T, R)> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let output = Arc::clone(&slot);
        let owned_key = key.to_string();
        self.update_raw(
            key,
            Box::new(move |current: Option<String>| {
                let current = current
                    .map(|raw| decode::<T>(&owned_key, &raw))
                    .transpose()?;
                let (next, result) = modifier(current)?;
                let encoded = encode(&owned_key, &next)?;
                *output.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
                Ok(encoded)
            }),
        )
        .await?;

        let result = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        result.ok_or_else(|| {
            Error::Storage(StorageError::Write {
                key: key.to_string(),
                reason: "update finished without applying its modifier".to_string(),
            })
        })
    }
}

impl<P: StorageProvider + ?Sized> StorageProviderExt for P {}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|source| {
        Error::Storage(StorageError::Serialization {
            key: key.to_string(),
            source,
        })
    })
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|source| {
        Error::Storage(StorageError::Serialization {
            key: key.to_string(),
            source,
        })
    })
}
