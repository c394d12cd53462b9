//! Promptkit - versioned prompt history over interchangeable storage.
//!
//! Prompt optimizations are kept as [`domain::PromptRecord`]s. Records that
//! share a chain id form a versioned chain, derived on every read by the
//! [`history::HistoryManager`]. All persistence goes through the
//! [`storage::StorageProvider`] contract, whose read-modify-write
//! [`update_data`](storage::StorageProviderExt::update_data) is atomic per
//! key on every backend.
//!
//! [`App`] is the composition root: it reads configuration, builds the
//! storage through a [`storage::StorageFactory`] and wires the history
//! manager to it.

#![forbid(unsafe_code)]

// Public modules for library usage
pub mod domain;
pub mod error;
pub mod history;
pub mod storage;

// Composition root
pub mod app;
pub mod config;

// Public CLI module (needed by binary)
pub mod cli;

// Command implementations
pub mod commands;

// CLI output formatting
pub mod output;

pub use app::App;
pub use error::{Error, Result};
