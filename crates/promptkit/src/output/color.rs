//! Color and styling helpers for CLI output.
//!
//! Semantic Color Theme:
//!   - Success:   green   (completed actions, optimize records)
//!   - Warning:   yellow  (skipped imports, iterations)
//!   - Error:     red     (failures)
//!   - Info:      cyan    (record and chain ids)
//!   - Muted:     dimmed  (field labels, timestamps)
//!   - Emphasis:  bold    (section headers)

use crate::domain::RecordType;
use colored::Colorize;

use super::OutputConfig;

/// Apply semantic "success" color (green) to text.
pub fn success(text: &str, config: &OutputConfig) -> String {
    if !config.use_colors {
        return text.to_string();
    }
    text.green().to_string()
}

/// Apply semantic "error" color (red) to text.
pub fn error(text: &str, config: &OutputConfig) -> String {
    if !config.use_colors {
        return text.to_string();
    }
    text.red().to_string()
}

/// Apply semantic "warning" color (yellow) to text.
pub fn warning(text: &str, config: &OutputConfig) -> String {
    if !config.use_colors {
        return text.to_string();
    }
    text.yellow().to_string()
}

/// Apply semantic "info" color (cyan) to text.
pub fn info(text: &str, config: &OutputConfig) -> String {
    if !config.use_colors {
        return text.to_string();
    }
    text.cyan().to_string()
}

/// Apply dimmed style to text (for labels/field names).
pub(crate) fn dimmed(text: &str, config: &OutputConfig) -> String {
    if !config.use_colors {
        return text.to_string();
    }
    text.dimmed().to_string()
}

/// Apply bold style to text (for section headers).
pub(crate) fn bold(text: &str, config: &OutputConfig) -> String {
    if !config.use_colors {
        return text.to_string();
    }
    text.bold().to_string()
}

/// Color a record type tag.
pub(crate) fn colorize_record_type(record_type: RecordType, config: &OutputConfig) -> String {
    let text = record_type.to_string();
    if !config.use_colors {
        return text;
    }
    match record_type {
        RecordType::Optimize => text.green().to_string(),
        RecordType::Iterate => text.yellow().to_string(),
    }
}
