//! Non-fatal problems found while loading JSONL tables.
//!
//! A damaged line should not make a whole table unreadable. Resilient
//! readers skip it and report a [`Warning`] so the caller can log it.

/// A non-fatal warning produced during JSONL processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A line contained JSON that could not be decoded into the row type.
    MalformedJson {
        /// The 1-based line number where the error occurred.
        line_number: usize,
        /// The decoder message.
        error: String,
    },

    /// A line decoded but was rejected by the caller.
    SkippedLine {
        /// The 1-based line number that was skipped.
        line_number: usize,
        /// Why the line was skipped.
        reason: String,
    },
}

impl Warning {
    /// Returns the line number associated with this warning.
    #[must_use]
    pub fn line_number(&self) -> usize {
        match self {
            Self::MalformedJson { line_number, .. } | Self::SkippedLine { line_number, .. } => {
                *line_number
            }
        }
    }

    /// Returns a static tag identifying the warning kind.
    ///
    /// # Examples
    ///
    /// ```
    /// use promptkit_jsonl::Warning;
    ///
    /// let warning = Warning::MalformedJson {
    ///     line_number: 3,
    ///     error: "expected value".to_string(),
    /// };
    /// assert_eq!(warning.kind(), "malformed_json");
    /// ```
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedJson { .. } => "malformed_json",
            Self::SkippedLine { .. } => "skipped_line",
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedJson { line_number, error } => {
                write!(f, "line {line_number}: malformed JSON: {error}")
            }
            Self::SkippedLine {
                line_number,
                reason,
            } => write!(f, "line {line_number}: skipped: {reason}"),
        }
    }
}

impl std::error::Error for Warning {}
