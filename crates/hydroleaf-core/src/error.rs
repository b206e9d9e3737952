//! Error types for hydroleaf-core.
//!
//! Validation failures ([`Error::MalformedIdentifier`], [`Error::InvalidRange`],
//! [`Error::InvalidBucket`], [`Error::InvalidReading`]) are always returned
//! before any side effect takes place. [`Error::UnknownDevice`] is only
//! produced by queries, since ingestion auto-registers unseen devices.
//!
//! Storage failures carry the underlying [`hydroleaf_store::Error`] as their
//! source:
//!
//! | Error | Caller action |
//! |-------|---------------|
//! | [`Error::StorageWrite`] | Retry later; a failed flush re-queues its data |
//! | [`Error::StorageRead`] | Retry the query |

use thiserror::Error;

use hydroleaf_types::ParseError;

/// Result type for hydroleaf-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the telemetry engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Composite identifier does not follow `<system>-<layer>-<deviceId>`.
    #[error("Malformed composite identifier '{0}': expected <system>-<layer>-<deviceId>")]
    MalformedIdentifier(String),

    /// Device is not registered.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Query range is missing, inverted or too wide.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Bucket width could not be parsed.
    #[error("Invalid bucket width '{0}'")]
    InvalidBucket(String),

    /// Reading has an empty sensor type or a non-finite value.
    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    /// Writing to storage failed.
    #[error("Storage write failed: {0}")]
    StorageWrite(#[source] hydroleaf_store::Error),

    /// Reading from storage failed.
    #[error("Storage read failed: {0}")]
    StorageRead(#[source] hydroleaf_store::Error),
}

impl Error {
    /// Whether the error was caused by caller input rather than the backend.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Error::StorageWrite(_) | Error::StorageRead(_))
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::MalformedIdentifier(raw) => Error::MalformedIdentifier(raw),
            ParseError::InvalidBucket(raw) => Error::InvalidBucket(raw),
            ParseError::InvalidTimestamp(raw) => {
                Error::InvalidRange(format!("invalid timestamp '{raw}'"))
            }
            other => Error::InvalidReading(other.to_string()),
        }
    }
}
