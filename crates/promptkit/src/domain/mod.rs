//! Domain types for prompt history.
//!
//! A [`PromptRecord`] is one optimization or iteration result. Records that
//! share a `chain_id` form a chain of versions linked through `previous_id`.
//! Chains are never stored; a [`PromptRecordChain`] is derived from the flat
//! record list on every read.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Free-form metadata attached to a record
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// How a record was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    /// First optimization of a prompt (chain root)
    Optimize,

    /// Refinement of an earlier version
    Iterate,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Optimize => write!(f, "optimize"),
            Self::Iterate => write!(f, "iterate"),
        }
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "optimize" => Ok(Self::Optimize),
            "iterate" => Ok(Self::Iterate),
            _ => Err(format!("Invalid record type: {s}")),
        }
    }
}

/// One point-in-time optimization or iteration result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRecord {
    /// Unique across the whole history
    pub id: String,

    /// Chain this record belongs to
    pub chain_id: String,

    /// Position in the chain, starting at 1
    pub version: u32,

    /// Predecessor record; set iff `version > 1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,

    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Prompt as the user wrote it
    pub original_prompt: String,

    /// Prompt after optimization
    pub optimized_prompt: String,

    /// How the record was produced
    #[serde(rename = "type")]
    pub record_type: RecordType,

    /// Model configuration key
    pub model_key: String,

    /// Display name of the model (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// Template used for the optimization
    pub template_id: String,

    /// What the user asked to change (iterations only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_note: Option<String>,

    /// Extra data (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl PromptRecord {
    /// Checks required fields and the version/predecessor pairing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("id", &self.id),
            ("chainId", &self.chain_id),
            ("originalPrompt", &self.original_prompt),
            ("optimizedPrompt", &self.optimized_prompt),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{field} is required")));
            }
        }

        if self.version == 0 {
            return Err(Error::Validation("version must be at least 1".to_string()));
        }
        match (&self.previous_id, self.version) {
            (Some(_), 1) => Err(Error::Validation(format!(
                "record '{}' is version 1 but has a previousId",
                self.id
            ))),
            (None, v) if v > 1 => Err(Error::Validation(format!(
                "record '{}' is version {v} but has no previousId",
                self.id
            ))),
            _ => Ok(()),
        }
    }

    /// Whether this is a chain root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.version == 1 && self.previous_id.is_none()
    }
}

/// Versions of one chain, derived from the flat record list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRecordChain {
    /// Chain identifier
    pub chain_id: String,

    /// The version-1 record
    pub root_record: PromptRecord,

    /// The highest-version record
    pub current_record: PromptRecord,

    /// Every record of the chain, ascending by version
    pub versions: Vec<PromptRecord>,
}

/// Input for starting a new chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChain {
    /// Prompt as the user wrote it
    pub original_prompt: String,

    /// Prompt after optimization
    pub optimized_prompt: String,

    /// Model configuration key
    pub model_key: String,

    /// Display name of the model
    #[serde(default)]
    pub model_name: Option<String>,

    /// Template used
    pub template_id: String,

    /// Extra data
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Input for adding a version to an existing chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIteration {
    /// Chain to extend
    pub chain_id: String,

    /// Prompt the iteration started from
    pub original_prompt: String,

    /// Result of the iteration
    pub optimized_prompt: String,

    /// What the user asked to change
    #[serde(default)]
    pub iteration_note: Option<String>,

    /// Model configuration key
    pub model_key: String,

    /// Display name of the model
    #[serde(default)]
    pub model_name: Option<String>,

    /// Template used
    pub template_id: String,

    /// Extra data
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// A record that import skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    /// Id of the skipped record (may be empty if the record had none)
    pub id: String,

    /// Why it was skipped
    pub reason: String,
}

/// Result of importing records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Number of records stored
    pub imported: usize,

    /// Records that were not stored
    pub skipped: Vec<ImportFailure>,
}
