//! CLI input validation functions.
//!
//! Used by clap's `value_parser` attribute so bad input is rejected at parse
//! time, before any storage is opened.

use crate::domain::Metadata;

/// Validate a record or chain id: non-empty, no whitespace or control
/// characters.
pub fn validate_id(s: &str) -> Result<String, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("ID cannot be empty".to_string());
    }

    if let Some(c) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("ID cannot contain {c:?}"));
    }

    Ok(s.to_string())
}

/// Validate prompt text.
///
/// Multi-line text is fine; blank text and control characters other than
/// tab and newlines are not.
pub fn validate_prompt(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        return Err("Prompt cannot be empty".to_string());
    }

    if let Some(pos) = s.chars().position(|c| {
        let code = c as u32;
        (code < 0x20 && code != 0x09 && code != 0x0A && code != 0x0D)
            || (0x7F..=0x9F).contains(&code)
    }) {
        return Err(format!(
            "Prompt contains invalid control character at position {pos}"
        ));
    }

    Ok(s.to_string())
}

/// Parse `--metadata` as a JSON object.
pub fn parse_metadata(s: &str) -> Result<Metadata, String> {
    match serde_json::from_str::<serde_json::Value>(s) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err("Metadata must be a JSON object".to_string()),
        Err(e) => Err(format!("Invalid metadata JSON: {e}")),
    }
}
