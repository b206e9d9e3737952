//! Error types for parsing in hydroleaf-types.

use thiserror::Error;

/// Errors that can occur when parsing identifiers, bucket widths and timestamps.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Composite identifier does not follow `<system>-<layer>-<deviceId>`.
    #[error("Malformed composite identifier '{0}': expected <system>-<layer>-<deviceId>")]
    MalformedIdentifier(String),

    /// Bucket width is not a positive duration such as `30s`, `5m`, `1h` or `1d`.
    #[error("Invalid bucket width '{0}'")]
    InvalidBucket(String),

    /// Timestamp is neither RFC 3339 nor epoch milliseconds.
    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Result type alias using hydroleaf-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
