//! CLI argument parsing and command dispatch.
//!
//! A thin front end over [`HistoryManager`](crate::history::HistoryManager):
//! each command builds an [`App`](crate::app::App), calls one manager
//! operation and prints the result.
//!
//! # Commands
//!
//! - `init`: Initialize a new promptkit project
//! - `record`: Store a new optimization as the root of a new chain
//! - `iterate`: Add a version to an existing chain
//! - `history`: List, inspect, delete, export and import records
//! - `storage info`: Show the active backend and its guarantees
//!
//! # Global Flags
//!
//! - `--json`: Output in JSON format (applies to all commands)
//!
//! # Example
//!
//! ```bash
//! promptkit record -o "write a haiku" -O "Write a haiku about autumn." -m gpt-4o
//! promptkit iterate 3f2c... -O "Write a melancholic haiku about autumn." -n "sadder"
//! promptkit history chains
//! promptkit --json history chain 3f2c...
//! ```

mod args;
mod execute;
mod types;
mod validators;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub use args::{
    HistoryAction, HistoryArgs, InitArgs, IterateArgs, ModelArgs, RecordArgs, StorageAction,
    StorageArgs,
};
pub use types::{BackendArg, FileFormatArg};
pub use validators::{parse_metadata, validate_id, validate_prompt};

/// Promptkit - versioned prompt history
///
/// Keeps every optimization and iteration of a prompt as a chain of versions,
/// stored in `.promptkit/` next to your project.
#[derive(Parser, Debug)]
#[command(name = "promptkit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output in JSON format for programmatic use
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Initialize a new promptkit project
    ///
    /// Creates the `.promptkit/` directory with configuration and an empty
    /// data directory.
    Init(InitArgs),

    /// Record a new optimization, starting a new chain
    Record(RecordArgs),

    /// Add an iteration to an existing chain
    Iterate(IterateArgs),

    /// Inspect and manage prompt history
    History(HistoryArgs),

    /// Inspect the storage backend
    Storage(StorageArgs),
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }

    /// Parse CLI arguments from an iterator (for testing)
    ///
    /// # Errors
    ///
    /// Returns the clap error for invalid arguments.
    pub fn try_parse_from<I, T>(iter: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(iter)
    }

    /// Execute the CLI command
    ///
    /// # Errors
    ///
    /// Returns any error from loading the project or running the command.
    pub async fn execute(&self) -> Result<()> {
        use crate::app::App;
        use crate::output::OutputMode;

        let output_mode = if self.json {
            OutputMode::Json
        } else {
            OutputMode::Text
        };

        match &self.command {
            Some(Commands::Init(args)) => execute::execute_init(args, output_mode).await,
            Some(Commands::Record(args)) => {
                let app = App::from_directory(&std::env::current_dir()?).await?;
                execute::execute_record(&app, args, output_mode).await
            }
            Some(Commands::Iterate(args)) => {
                let app = App::from_directory(&std::env::current_dir()?).await?;
                execute::execute_iterate(&app, args, output_mode).await
            }
            Some(Commands::History(args)) => {
                let app = App::from_directory(&std::env::current_dir()?).await?;
                execute::execute_history(&app, args, output_mode).await
            }
            Some(Commands::Storage(args)) => {
                let app = App::from_directory(&std::env::current_dir()?).await?;
                execute::execute_storage(&app, args, output_mode).await
            }
            None => {
                println!("Promptkit prompt history");
                println!("Use --help for more information");
                Ok(())
            }
        }
    }
}
