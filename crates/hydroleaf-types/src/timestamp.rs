//! Timestamp parsing and Unix millisecond conversion.
//!
//! All instants handled by Hydroleaf are UTC. Storage persists them as Unix
//! epoch milliseconds; external callers may supply either epoch milliseconds
//! or RFC 3339 strings.

use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::error::{ParseError, ParseResult};

/// Parse an instant given as epoch milliseconds (`1704067200000`) or as an
/// RFC 3339 string (`2024-01-01T00:00:00Z`). The result is normalized to UTC.
pub fn parse_instant(raw: &str) -> ParseResult<OffsetDateTime> {
    let trimmed = raw.trim();
    let invalid = || ParseError::InvalidTimestamp(raw.to_string());

    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        let millis: i64 = trimmed.parse().map_err(|_| invalid())?;
        return from_unix_millis(millis).map_err(|_| invalid());
    }

    OffsetDateTime::parse(trimmed, &Rfc3339)
        .map(|t| t.to_offset(UtcOffset::UTC))
        .map_err(|_| invalid())
}

/// Milliseconds since the Unix epoch, floored.
pub fn to_unix_millis(t: OffsetDateTime) -> i64 {
    t.unix_timestamp_nanos().div_euclid(1_000_000) as i64
}

/// Build a UTC instant from milliseconds since the Unix epoch.
pub fn from_unix_millis(millis: i64) -> ParseResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|_| ParseError::InvalidTimestamp(millis.to_string()))
}
