//! Output formatting for CLI commands.
//!
//! Every printer supports human-readable text and pretty JSON. The text
//! renderers write to any [`Write`] so they can be tested without a terminal.

pub mod color;

use crate::app::StorageInfo;
use crate::domain::{ImportReport, PromptRecord, PromptRecordChain};
use chrono::DateTime;
use serde::Serialize;
use std::env;
use std::io::{self, Write};

pub use color::{error, info, success, warning};

use color::{bold, colorize_record_type, dimmed};

/// Longest prompt preview shown in list views, in characters.
const PREVIEW_CHARS: usize = 60;

/// Settings that control text output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Whether to use colors in output.
    pub use_colors: bool,
}

impl OutputConfig {
    /// Reads `NO_COLOR` and `PROMPTKIT_COLOR` from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`OutputConfig::from_env`] over an arbitrary variable source.
    ///
    /// Colors are on unless `NO_COLOR` is set (any value) or
    /// `PROMPTKIT_COLOR` is `0` or `false`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let use_colors = lookup("NO_COLOR").is_none()
            && lookup("PROMPTKIT_COLOR")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true);
        Self { use_colors }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { use_colors: true }
    }
}

/// Output format mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable text format
    Text,
    /// JSON format for programmatic use
    Json,
}

// ============================================================================
// Public Dispatch Functions
// ============================================================================

/// Print a single record with all of its fields
pub fn print_record(record: &PromptRecord, mode: OutputMode) -> io::Result<()> {
    match mode {
        OutputMode::Json => print_json(record),
        OutputMode::Text => {
            write_record_details(&mut io::stdout().lock(), record, &OutputConfig::from_env())
        }
    }
}

/// Print a list of records, one line each
pub fn print_records(records: &[PromptRecord], mode: OutputMode) -> io::Result<()> {
    match mode {
        OutputMode::Json => print_json(&records),
        OutputMode::Text => {
            write_records(&mut io::stdout().lock(), records, &OutputConfig::from_env())
        }
    }
}

/// Print one chain with its versions
pub fn print_chain(chain: &PromptRecordChain, mode: OutputMode) -> io::Result<()> {
    match mode {
        OutputMode::Json => print_json(chain),
        OutputMode::Text => write_chain(&mut io::stdout().lock(), chain, &OutputConfig::from_env()),
    }
}

/// Print a summary line per chain
pub fn print_chains(chains: &[PromptRecordChain], mode: OutputMode) -> io::Result<()> {
    match mode {
        OutputMode::Json => print_json(&chains),
        OutputMode::Text => {
            write_chains(&mut io::stdout().lock(), chains, &OutputConfig::from_env())
        }
    }
}

/// Print the outcome of an import
pub fn print_import_report(report: &ImportReport, mode: OutputMode) -> io::Result<()> {
    match mode {
        OutputMode::Json => print_json(report),
        OutputMode::Text => {
            write_import_report(&mut io::stdout().lock(), report, &OutputConfig::from_env())
        }
    }
}

/// Print storage diagnostics
pub fn print_storage_info(info: &StorageInfo, mode: OutputMode) -> io::Result<()> {
    match mode {
        OutputMode::Json => print_json(info),
        OutputMode::Text => {
            write_storage_info(&mut io::stdout().lock(), info, &OutputConfig::from_env())
        }
    }
}

/// Print a simple message
pub fn print_message(msg: &str) -> io::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{msg}")
}

/// Print a JSON-formatted result for any serializable value
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(handle, "{json}")
}

// ============================================================================
// Text Formatting
// ============================================================================

fn format_timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// First line of `text`, cut to [`PREVIEW_CHARS`] characters.
fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= PREVIEW_CHARS && !text.contains('\n') {
        return line.to_string();
    }
    let cut: String = line.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}

fn write_record_line<W: Write>(
    w: &mut W,
    record: &PromptRecord,
    config: &OutputConfig,
) -> io::Result<()> {
    writeln!(
        w,
        "{}  v{}  {}  {}  {}",
        info(&record.id, config),
        record.version,
        colorize_record_type(record.record_type, config),
        dimmed(&format_timestamp(record.timestamp), config),
        preview(&record.optimized_prompt)
    )
}

fn write_records<W: Write>(
    w: &mut W,
    records: &[PromptRecord],
    config: &OutputConfig,
) -> io::Result<()> {
    if records.is_empty() {
        return writeln!(w, "No records found.");
    }

    writeln!(w, "Found {} record(s):", records.len())?;
    writeln!(w)?;
    for record in records {
        write_record_line(w, record, config)?;
    }
    Ok(())
}

fn write_record_details<W: Write>(
    w: &mut W,
    record: &PromptRecord,
    config: &OutputConfig,
) -> io::Result<()> {
    writeln!(
        w,
        "{} {}",
        bold("Record", config),
        info(&record.id, config)
    )?;

    let field = |name: &str| dimmed(&format!("{name:<10}"), config);
    writeln!(w, "  {} {}", field("Chain:"), info(&record.chain_id, config))?;
    writeln!(w, "  {} {}", field("Version:"), record.version)?;
    writeln!(
        w,
        "  {} {}",
        field("Type:"),
        colorize_record_type(record.record_type, config)
    )?;
    if let Some(previous) = &record.previous_id {
        writeln!(w, "  {} {}", field("Previous:"), previous)?;
    }
    writeln!(
        w,
        "  {} {}",
        field("Created:"),
        format_timestamp(record.timestamp)
    )?;
    match &record.model_name {
        Some(name) => writeln!(w, "  {} {name} ({})", field("Model:"), record.model_key)?,
        None => writeln!(w, "  {} {}", field("Model:"), record.model_key)?,
    }
    writeln!(w, "  {} {}", field("Template:"), record.template_id)?;

    if let Some(note) = &record.iteration_note {
        writeln!(w)?;
        writeln!(w, "{}", bold("Iteration note:", config))?;
        writeln!(w, "  {note}")?;
    }

    for (title, body) in [
        ("Original prompt:", &record.original_prompt),
        ("Optimized prompt:", &record.optimized_prompt),
    ] {
        writeln!(w)?;
        writeln!(w, "{}", bold(title, config))?;
        for line in body.lines() {
            writeln!(w, "  {line}")?;
        }
    }
    Ok(())
}

fn write_chain<W: Write>(
    w: &mut W,
    chain: &PromptRecordChain,
    config: &OutputConfig,
) -> io::Result<()> {
    writeln!(
        w,
        "{} {} ({} version(s), current v{})",
        bold("Chain", config),
        info(&chain.chain_id, config),
        chain.versions.len(),
        chain.current_record.version
    )?;
    writeln!(
        w,
        "  {} {}",
        dimmed("Original:", config),
        preview(&chain.root_record.original_prompt)
    )?;
    writeln!(w)?;
    for record in &chain.versions {
        write_record_line(w, record, config)?;
        if let Some(note) = &record.iteration_note {
            writeln!(w, "    {} {}", dimmed("note:", config), preview(note))?;
        }
    }
    Ok(())
}

fn write_chains<W: Write>(
    w: &mut W,
    chains: &[PromptRecordChain],
    config: &OutputConfig,
) -> io::Result<()> {
    if chains.is_empty() {
        return writeln!(w, "No chains found.");
    }

    writeln!(w, "Found {} chain(s):", chains.len())?;
    writeln!(w)?;
    for chain in chains {
        writeln!(
            w,
            "{}  v{}  {}  {}",
            info(&chain.chain_id, config),
            chain.current_record.version,
            dimmed(&format_timestamp(chain.current_record.timestamp), config),
            preview(&chain.root_record.original_prompt)
        )?;
    }
    Ok(())
}

fn write_import_report<W: Write>(
    w: &mut W,
    report: &ImportReport,
    config: &OutputConfig,
) -> io::Result<()> {
    writeln!(
        w,
        "{} {} record(s)",
        success("Imported", config),
        report.imported
    )?;
    if !report.skipped.is_empty() {
        writeln!(
            w,
            "{} {} record(s):",
            warning("Skipped", config),
            report.skipped.len()
        )?;
        for failure in &report.skipped {
            let id = if failure.id.is_empty() {
                "<no id>"
            } else {
                failure.id.as_str()
            };
            writeln!(w, "  {}: {}", info(id, config), failure.reason)?;
        }
    }
    Ok(())
}

fn write_storage_info<W: Write>(
    w: &mut W,
    storage: &StorageInfo,
    config: &OutputConfig,
) -> io::Result<()> {
    let caps = &storage.capabilities;
    writeln!(w, "{}", bold("Storage", config))?;
    writeln!(w, "  Backend:    {}", info(storage.backend, config))?;
    if let Some(dir) = &storage.data_dir {
        writeln!(w, "  Data dir:   {}", dir.display())?;
    }
    writeln!(w, "  Keys:       {}", storage.keys)?;
    writeln!(w, "  Atomicity:  {:?}", caps.atomicity)?;
    writeln!(w, "  Batch:      {:?}", caps.batch)?;
    match caps.max_size {
        Some(bytes) => writeln!(w, "  Max size:   {bytes} bytes")?,
        None => writeln!(w, "  Max size:   unlimited")?,
    }
    match &storage.migration {
        Some(outcome) if outcome.is_complete() => {
            writeln!(w, "  Migration:  {}", success(&format!("{outcome:?}"), config))?;
        }
        Some(outcome) => {
            writeln!(w, "  Migration:  {}", error(&format!("{outcome:?}"), config))?;
        }
        None => writeln!(w, "  Migration:  {}", dimmed("not run", config))?,
    }
    Ok(())
}
