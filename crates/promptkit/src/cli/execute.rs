//! Command execution logic.
//!
//! This module contains the implementation of all CLI commands.

use anyhow::Result;
use std::path::Path;

use super::args::{
    HistoryAction, HistoryArgs, InitArgs, IterateArgs, ModelArgs, RecordArgs, StorageAction,
    StorageArgs,
};
use super::types::FileFormatArg;
use crate::app::App;
use crate::domain::{ImportFailure, NewChain, NewIteration, PromptRecord};
use crate::error::Error;
use crate::output::{self, OutputConfig, OutputMode};

/// Execute the init command
pub async fn execute_init(args: &InitArgs, output_mode: OutputMode) -> Result<()> {
    use crate::commands::init;

    let current_dir = std::env::current_dir()?;
    let result = init::init(&current_dir, args.backend.map(Into::into)).await?;

    match output_mode {
        OutputMode::Json => {
            output::print_json(&serde_json::json!({
                "promptkit_dir": result.promptkit_dir.display().to_string(),
                "config_file": result.config_file.display().to_string(),
                "data_dir": result.data_dir.display().to_string(),
                "backend": result.backend.to_string(),
            }))?;
        }
        OutputMode::Text if !args.quiet => {
            let config = OutputConfig::from_env();
            println!(
                "{} promptkit in {}",
                output::success("Initialized", &config),
                result.promptkit_dir.display()
            );
            println!("  Config:  {}", result.config_file.display());
            println!("  Data:    {}", result.data_dir.display());
            println!("  Backend: {}", result.backend);
        }
        OutputMode::Text => {}
    }

    Ok(())
}

/// Execute the record command
pub async fn execute_record(app: &App, args: &RecordArgs, output_mode: OutputMode) -> Result<()> {
    let ModelArgs {
        model,
        model_name,
        template,
        metadata,
    } = args.model.clone();

    let chain = app
        .history()
        .create_new_chain(NewChain {
            original_prompt: args.original.clone(),
            optimized_prompt: args.optimized.clone(),
            model_key: model,
            model_name,
            template_id: template,
            metadata,
        })
        .await?;

    match output_mode {
        OutputMode::Json => output::print_json(&chain)?,
        OutputMode::Text => {
            let config = OutputConfig::from_env();
            println!(
                "{} chain {} (record {})",
                output::success("Created", &config),
                output::info(&chain.chain_id, &config),
                chain.current_record.id
            );
        }
    }

    Ok(())
}

/// Execute the iterate command
pub async fn execute_iterate(app: &App, args: &IterateArgs, output_mode: OutputMode) -> Result<()> {
    let original_prompt = match &args.original {
        Some(original) => original.clone(),
        None => {
            app.history()
                .get_chain(&args.chain_id)
                .await?
                .current_record
                .optimized_prompt
        }
    };
    let ModelArgs {
        model,
        model_name,
        template,
        metadata,
    } = args.model.clone();

    let chain = app
        .history()
        .add_iteration(NewIteration {
            chain_id: args.chain_id.clone(),
            original_prompt,
            optimized_prompt: args.optimized.clone(),
            iteration_note: args.note.clone(),
            model_key: model,
            model_name,
            template_id: template,
            metadata,
        })
        .await?;

    match output_mode {
        OutputMode::Json => output::print_json(&chain)?,
        OutputMode::Text => {
            let config = OutputConfig::from_env();
            println!(
                "{} version {} to chain {} (record {})",
                output::success("Added", &config),
                chain.current_record.version,
                output::info(&chain.chain_id, &config),
                chain.current_record.id
            );
        }
    }

    Ok(())
}

/// Execute a history subcommand
pub async fn execute_history(app: &App, args: &HistoryArgs, output_mode: OutputMode) -> Result<()> {
    let history = app.history();

    match &args.action {
        HistoryAction::List { limit } => {
            let mut records = history.get_records().await?;
            if let Some(limit) = limit {
                records.truncate(*limit);
            }
            output::print_records(&records, output_mode)?;
        }
        HistoryAction::Show { id } => {
            let record = history.get_record(id).await?;
            output::print_record(&record, output_mode)?;
        }
        HistoryAction::Chain { chain_id } => {
            let chain = history.get_chain(chain_id).await?;
            output::print_chain(&chain, output_mode)?;
        }
        HistoryAction::Chains => {
            let chains = history.get_all_chains().await?;
            output::print_chains(&chains, output_mode)?;
        }
        HistoryAction::Lineage { id } => {
            let lineage = history.get_iteration_chain(id).await?;
            if lineage.is_empty() {
                return Err(Error::RecordNotFound(id.clone()).into());
            }
            output::print_records(&lineage, output_mode)?;
        }
        HistoryAction::Delete { id } => {
            history.delete_record(id).await?;
            print_done(output_mode, "deleted", id, &format!("Deleted record {id}"))?;
        }
        HistoryAction::DeleteChain { chain_id } => {
            let removed = history.delete_chain(chain_id).await?;
            match output_mode {
                OutputMode::Json => output::print_json(&serde_json::json!({
                    "deleted_chain": chain_id,
                    "records": removed,
                }))?,
                OutputMode::Text => output::print_message(&format!(
                    "Deleted chain {chain_id} ({removed} record(s))"
                ))?,
            }
        }
        HistoryAction::Clear { force } => {
            if !force {
                anyhow::bail!("Refusing to clear history without --force");
            }
            history.clear_history().await?;
            print_done(output_mode, "cleared", "history", "Cleared history")?;
        }
        HistoryAction::Export {
            output: file,
            format,
        } => {
            let records = history.export_records().await?;
            match file {
                Some(path) => {
                    write_export(path, &records, *format).await?;
                    match output_mode {
                        OutputMode::Json => output::print_json(&serde_json::json!({
                            "exported": records.len(),
                            "path": path.display().to_string(),
                        }))?,
                        OutputMode::Text => output::print_message(&format!(
                            "Exported {} record(s) to {}",
                            records.len(),
                            path.display()
                        ))?,
                    }
                }
                None => print_export(&records, *format)?,
            }
        }
        HistoryAction::Import { input, format } => {
            let (records, mut unreadable) = read_import(input, *format).await?;
            let mut report = history.import_records(records).await?;
            report.skipped.append(&mut unreadable);
            output::print_import_report(&report, output_mode)?;
        }
    }

    Ok(())
}

/// Execute a storage subcommand
pub async fn execute_storage(app: &App, args: &StorageArgs, output_mode: OutputMode) -> Result<()> {
    match args.action {
        StorageAction::Info => {
            let info = app.storage_info().await?;
            output::print_storage_info(&info, output_mode)?;
        }
    }
    Ok(())
}

fn print_done(output_mode: OutputMode, action: &str, target: &str, text: &str) -> Result<()> {
    match output_mode {
        OutputMode::Json => output::print_json(&serde_json::json!({ action: target }))?,
        OutputMode::Text => output::print_message(text)?,
    }
    Ok(())
}

async fn write_export(path: &Path, records: &[PromptRecord], format: FileFormatArg) -> Result<()> {
    match format {
        FileFormatArg::Jsonl => promptkit_jsonl::write_jsonl_atomic(path, records).await?,
        FileFormatArg::Json => {
            let json = serde_json::to_string_pretty(records)?;
            tokio::fs::write(path, json).await?;
        }
    }
    Ok(())
}

fn print_export(records: &[PromptRecord], format: FileFormatArg) -> Result<()> {
    match format {
        FileFormatArg::Jsonl => {
            for record in records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        FileFormatArg::Json => output::print_json(records)?,
    }
    Ok(())
}

/// Reads an import file. Damaged JSONL lines are returned as failures
/// instead of aborting the import.
async fn read_import(
    path: &Path,
    format: FileFormatArg,
) -> Result<(Vec<PromptRecord>, Vec<ImportFailure>)> {
    match format {
        FileFormatArg::Jsonl => {
            let (records, warnings) = promptkit_jsonl::read_jsonl_resilient(path).await?;
            let failures = warnings
                .into_iter()
                .map(|w| ImportFailure {
                    id: String::new(),
                    reason: w.to_string(),
                })
                .collect();
            Ok((records, failures))
        }
        FileFormatArg::Json => {
            let content = tokio::fs::read_to_string(path).await?;
            Ok((serde_json::from_str(&content)?, Vec::new()))
        }
    }
}
