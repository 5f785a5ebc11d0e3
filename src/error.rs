//! Error types for the ingestion, cache and fallback pipeline.
//!
//! None of these are fatal to the host process. Parse failures abort a single
//! refresh, fetch failures fall back to the mirror, and storage failures are
//! always absorbed by the caller.

use thiserror::Error;

/// The feed text did not have the structure the parser needs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Fewer than two lines, so there is no header row to read.
    #[error("feed has no header row")]
    MissingHeader,

    /// The header row does not name a `TIMESTAMP` column.
    #[error("header row has no TIMESTAMP column")]
    MissingTimestampColumn,
}

/// Retrieval of the live feed failed.
///
/// `Clone` so that a single in-flight refresh can hand the same outcome to
/// every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// Connection, TLS, timeout or body decoding failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("feed returned HTTP {0}")]
    Status(u16),

    /// The body arrived but could not be turned into records.
    #[error("feed could not be parsed: {0}")]
    Parse(#[from] ParseError),

    /// Neither the feed nor the fallback mirror produced any record.
    #[error("no weather data available")]
    NoData,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::Status(status.as_u16()),
            None => Self::Transport(e.to_string()),
        }
    }
}

/// Reading or writing the fallback mirror failed.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Writing the value would exceed the store's capacity.
    #[error("storage quota exceeded writing '{key}' ({needed} bytes, {available} available)")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    /// The backing database rejected the operation.
    #[error("storage backend error: {0}")]
    Backend(#[from] sqlx::Error),

    /// A chunk could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
