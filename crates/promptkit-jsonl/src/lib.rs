//! JSON Lines persistence primitives for promptkit.
//!
//! Storage backends keep their tables as one JSON document per line. This
//! crate provides the pieces they need to do that safely:
//!
//! - [`JsonlReader`] for line-oriented async decoding with line tracking
//! - [`read_jsonl_resilient`] for loading a table while skipping damaged lines
//! - [`JsonlWriter`] for buffered encoding
//! - [`write_jsonl_atomic`] for crash-safe replacement of a whole table file

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod atomic;
pub mod error;
pub mod reader;
pub mod warning;
pub mod writer;

pub use atomic::{write_jsonl_atomic, write_jsonl_atomic_iter};
pub use error::{Error, Result};
pub use reader::{read_jsonl_resilient, JsonlReader};
pub use warning::Warning;
pub use writer::JsonlWriter;
