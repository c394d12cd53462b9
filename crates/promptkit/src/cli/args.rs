//! CLI argument structs for all commands.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::types::{BackendArg, FileFormatArg};
use super::validators::{parse_metadata, validate_id, validate_prompt};
use crate::domain::Metadata;

/// Arguments for the `init` command
#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Storage backend to configure
    #[arg(short, long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Suppress output messages
    #[arg(short, long)]
    pub quiet: bool,
}

/// Model and template options shared by `record` and `iterate`
#[derive(Parser, Debug, Clone)]
pub struct ModelArgs {
    /// Model configuration key
    #[arg(short, long)]
    pub model: String,

    /// Display name of the model
    #[arg(long)]
    pub model_name: Option<String>,

    /// Template used for the optimization
    #[arg(short, long, default_value = "general")]
    pub template: String,

    /// Extra data as a JSON object
    #[arg(long, value_parser = parse_metadata)]
    pub metadata: Option<Metadata>,
}

/// Arguments for the `record` command
#[derive(Parser, Debug, Clone)]
pub struct RecordArgs {
    /// Prompt as originally written
    #[arg(short, long, value_parser = validate_prompt)]
    pub original: String,

    /// Prompt after optimization
    #[arg(short = 'O', long, value_parser = validate_prompt)]
    pub optimized: String,

    /// Model and template
    #[command(flatten)]
    pub model: ModelArgs,
}

/// Arguments for the `iterate` command
#[derive(Parser, Debug, Clone)]
pub struct IterateArgs {
    /// Chain to extend
    #[arg(value_parser = validate_id)]
    pub chain_id: String,

    /// Result of the iteration
    #[arg(short = 'O', long, value_parser = validate_prompt)]
    pub optimized: String,

    /// Prompt the iteration started from (defaults to the chain's latest
    /// optimized prompt)
    #[arg(short, long, value_parser = validate_prompt)]
    pub original: Option<String>,

    /// What was asked to change
    #[arg(short, long)]
    pub note: Option<String>,

    /// Model and template
    #[command(flatten)]
    pub model: ModelArgs,
}

/// Arguments for the `history` command
#[derive(Parser, Debug, Clone)]
pub struct HistoryArgs {
    /// History action
    #[command(subcommand)]
    pub action: HistoryAction,
}

/// History actions
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryAction {
    /// List records, newest first
    List {
        /// Maximum number of records to display
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show one record
    Show {
        /// Record ID
        #[arg(value_parser = validate_id)]
        id: String,
    },

    /// Show one chain with all of its versions
    Chain {
        /// Chain ID
        #[arg(value_parser = validate_id)]
        chain_id: String,
    },

    /// List chains, most recently updated first
    Chains,

    /// Show the ancestry of a record, root first
    Lineage {
        /// Record ID
        #[arg(value_parser = validate_id)]
        id: String,
    },

    /// Delete one record
    Delete {
        /// Record ID
        #[arg(value_parser = validate_id)]
        id: String,
    },

    /// Delete every version of a chain
    DeleteChain {
        /// Chain ID
        #[arg(value_parser = validate_id)]
        chain_id: String,
    },

    /// Remove all records
    Clear {
        /// Required; clearing cannot be undone
        #[arg(short, long)]
        force: bool,
    },

    /// Write all records to a file or stdout
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// File format
        #[arg(short, long, value_enum, default_value = "jsonl")]
        format: FileFormatArg,
    },

    /// Add records from a file
    Import {
        /// Input file
        input: PathBuf,

        /// File format
        #[arg(short, long, value_enum, default_value = "jsonl")]
        format: FileFormatArg,
    },
}

/// Arguments for the `storage` command
#[derive(Parser, Debug, Clone)]
pub struct StorageArgs {
    /// Storage action
    #[command(subcommand)]
    pub action: StorageAction,
}

/// Storage actions
#[derive(Subcommand, Debug, Clone)]
pub enum StorageAction {
    /// Show backend, capabilities and migration status
    Info,
}
