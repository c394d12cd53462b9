//! JSONL reading operations.
//!
//! Table files are read line by line. Each non-blank line holds one JSON
//! document; blank lines are ignored so that hand-edited files still load.

use crate::warning::Warning;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

/// Async reader for JSONL (JSON Lines) data.
///
/// `JsonlReader` wraps an async reader in a [`BufReader`] and tracks the
/// current line number so decode failures can point at the damaged line.
///
/// # Examples
///
/// ```no_run
/// use promptkit_jsonl::JsonlReader;
/// use tokio::fs::File;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let file = File::open("records.jsonl").await?;
/// let mut reader = JsonlReader::new(file);
/// while let Some(value) = reader.read_line::<serde_json::Value>().await? {
///     println!("{value}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct JsonlReader<R> {
    /// Buffered reader wrapping the underlying async reader.
    reader: BufReader<R>,
    /// Number of physical lines consumed so far (1-based after the first read).
    line_number: usize,
}

impl<R: AsyncRead + Unpin> JsonlReader<R> {
    /// Creates a new `JsonlReader` wrapping the given async reader.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line_number: 0,
        }
    }

    /// Creates a new `JsonlReader` with a custom buffer capacity.
    #[must_use]
    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity, reader),
            line_number: 0,
        }
    }

    /// Returns the number of the last line consumed, or 0 before any read.
    #[must_use]
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Reads the next non-blank line and decodes it.
    ///
    /// Returns `Ok(None)` at end of input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the underlying reader fails and
    /// [`Error::InvalidFormat`] if the line is not a valid `T`.
    pub async fn read_line<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            let Some(line) = self.next_raw_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(line.trim())
                .map(Some)
                .map_err(|e| Error::InvalidFormat {
                    line_number: self.line_number,
                    reason: e.to_string(),
                });
        }
    }

    /// Reads every remaining line, skipping lines that fail to decode.
    ///
    /// Decode failures are reported as [`Warning`]s instead of errors; only
    /// I/O failures abort the read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the underlying reader fails.
    pub async fn read_resilient<T: DeserializeOwned>(&mut self) -> Result<(Vec<T>, Vec<Warning>)> {
        let mut values = Vec::new();
        let mut warnings = Vec::new();

        while let Some(line) = self.next_raw_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(trimmed) {
                Ok(value) => values.push(value),
                Err(e) => {
                    debug!(line = self.line_number, error = %e, "Skipping malformed JSONL line");
                    warnings.push(Warning::MalformedJson {
                        line_number: self.line_number,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok((values, warnings))
    }

    /// Consumes the reader, returning the underlying buffered reader.
    #[must_use]
    pub fn into_inner(self) -> BufReader<R> {
        self.reader
    }

    async fn next_raw_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let bytes = self.reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        Ok(Some(line))
    }
}

/// Loads a whole JSONL file, skipping lines that fail to decode.
///
/// Returns the decoded values in file order together with a warning for every
/// skipped line.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be opened or read. A missing file
/// is an error; callers that treat absence as "empty" should check first.
pub async fn read_jsonl_resilient<T, P>(path: P) -> Result<(Vec<T>, Vec<Warning>)>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref()).await?;
    JsonlReader::new(file).read_resilient().await
}
