//! CLI value enums and their conversions to configuration types.

use clap::ValueEnum;

use crate::config::BackendSetting;

/// Storage backend for CLI arguments
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendArg {
    /// Document store, falling back to local if it cannot be opened
    Auto,
    /// In-memory only; nothing is kept between runs
    Memory,
    /// Single JSON file
    Local,
    /// JSONL tables with transactions
    Document,
}

impl From<BackendArg> for BackendSetting {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => Self::Auto,
            BackendArg::Memory => Self::Memory,
            BackendArg::Local => Self::Local,
            BackendArg::Document => Self::Document,
        }
    }
}

/// File format for export and import
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormatArg {
    /// One JSON record per line
    #[default]
    Jsonl,
    /// A single JSON array
    Json,
}
