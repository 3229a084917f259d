//! Error types shared by the timeline crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing or validating change data.
#[derive(Error, Debug)]
pub enum Error {
    /// A delimited bucket-id list contained a non-numeric item.
    #[error("invalid bucket list '{input}': item '{item}' is not an id")]
    InvalidBucketList {
        /// The full delimited text as received.
        input: String,
        /// The offending item, trimmed.
        item: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
