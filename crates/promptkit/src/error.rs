//! Error types for promptkit operations.
//!
//! Errors fall into two families. Domain faults (`Validation`,
//! `RecordNotFound`, `ChainNotFound`, `DuplicateRecord`, `Corrupted`) describe
//! the caller's data and are never worth retrying. Infrastructure faults
//! (`Storage`, `LockTimeout`) describe the backend; a caller may retry them,
//! treating the failed attempt as not applied.
//!
//! Domain errors returned from inside an update modifier reach the caller
//! unchanged, so matching on the variant is reliable.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The error type for promptkit operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error outside of a storage backend (configuration, init).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A record is malformed or incomplete.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No record with the given id exists.
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// No chain with the given id exists.
    #[error("Chain not found: {0}")]
    ChainNotFound(String),

    /// A record with the same id is already stored.
    #[error("Record already exists: {0}")]
    DuplicateRecord(String),

    /// A backend read or write failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The lock safety valve fired. The guarded operation must be treated as
    /// failed; its effects are unknown.
    #[error("Timed out after {timeout:?} on lock for key '{key}'")]
    LockTimeout {
        /// The key whose lock timed out (`*` for the whole store).
        key: String,
        /// The configured timeout that elapsed.
        timeout: Duration,
    },

    /// Migrating data between backends failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Stored data violates a chain invariant.
    #[error("Chain '{chain_id}' is inconsistent: {reason}")]
    Corrupted {
        /// The inconsistent chain.
        chain_id: String,
        /// What invariant was violated.
        reason: String,
    },

    /// The requested backend or operation is not available.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Returns a stable tag identifying the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::RecordNotFound(_) | Self::ChainNotFound(_) => "not_found",
            Self::DuplicateRecord(_) => "duplicate",
            Self::Storage(_) => "storage",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Migration(_) => "migration",
            Self::Corrupted { .. } => "corrupted",
            Self::Unsupported(_) => "unsupported",
        }
    }

    /// Whether retrying the same call could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::LockTimeout { .. })
    }
}

/// Failures raised by a storage backend itself.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading a key from the backend failed.
    #[error("failed to read '{key}': {reason}")]
    Read {
        /// The key being read.
        key: String,
        /// Backend-specific reason.
        reason: String,
    },

    /// Writing a key to the backend failed.
    #[error("failed to write '{key}': {reason}")]
    Write {
        /// The key being written.
        key: String,
        /// Backend-specific reason.
        reason: String,
    },

    /// The write would exceed the backend's size limit.
    #[error("quota exceeded writing '{key}': {required} bytes needed, limit is {limit}")]
    QuotaExceeded {
        /// The key being written.
        key: String,
        /// Total bytes the store would occupy after the write.
        required: u64,
        /// The configured limit.
        limit: u64,
    },

    /// A stored value could not be decoded, or a new value could not be encoded.
    #[error("invalid stored value for '{key}': {source}")]
    Serialization {
        /// The key whose value failed.
        key: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Persisting or loading a table file failed.
    #[error("table file {path}: {source}")]
    Table {
        /// The table file involved.
        path: PathBuf,
        /// The underlying JSONL error.
        #[source]
        source: promptkit_jsonl::Error,
    },

    /// Filesystem error in a file-backed store.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A specialized Result type for promptkit operations.
pub type Result<T> = std::result::Result<T, Error>;
