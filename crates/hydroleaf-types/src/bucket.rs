//! Time bucket widths and epoch-aligned truncation.

use core::fmt;
use core::str::FromStr;

use time::{Duration, OffsetDateTime, UtcOffset};

use crate::error::{ParseError, ParseResult};
use crate::timestamp::to_unix_millis;

/// Width of an aggregation bucket, in whole seconds.
///
/// Buckets are aligned to the Unix epoch, so a 5 minute bucket always starts
/// at `hh:00`, `hh:05`, `hh:10` and so on.
///
/// Accepted textual forms are a positive integer followed by an optional unit
/// suffix: `s` (seconds), `m` (minutes), `h` (hours) or `d` (days). A bare
/// integer is read as seconds.
///
/// ```
/// use hydroleaf_types::BucketWidth;
///
/// assert_eq!("5m".parse::<BucketWidth>().unwrap().seconds(), 300);
/// assert_eq!("300".parse::<BucketWidth>().unwrap().seconds(), 300);
/// assert!("0m".parse::<BucketWidth>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketWidth {
    seconds: u64,
}

impl BucketWidth {
    /// Largest accepted width (about 100 years).
    pub const MAX_SECONDS: u64 = 100 * 366 * 86_400;

    /// Create a width from a number of seconds.
    pub fn from_seconds(seconds: u64) -> ParseResult<Self> {
        if seconds == 0 || seconds > Self::MAX_SECONDS {
            return Err(ParseError::InvalidBucket(seconds.to_string()));
        }
        Ok(Self { seconds })
    }

    /// Create a width of `minutes` minutes.
    pub fn minutes(minutes: u64) -> ParseResult<Self> {
        Self::from_seconds(minutes.saturating_mul(60))
    }

    /// Parse a width such as `30s`, `5m`, `1h`, `1d` or `300`.
    pub fn parse(raw: &str) -> ParseResult<Self> {
        let trimmed = raw.trim();
        let invalid = || ParseError::InvalidBucket(raw.to_string());

        let (digits, multiplier) = match trimmed.char_indices().last() {
            Some((idx, 's')) | Some((idx, 'S')) => (&trimmed[..idx], 1),
            Some((idx, 'm')) | Some((idx, 'M')) => (&trimmed[..idx], 60),
            Some((idx, 'h')) | Some((idx, 'H')) => (&trimmed[..idx], 3_600),
            Some((idx, 'd')) | Some((idx, 'D')) => (&trimmed[..idx], 86_400),
            Some(_) => (trimmed, 1),
            None => return Err(invalid()),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let amount: u64 = digits.parse().map_err(|_| invalid())?;
        let seconds = amount.checked_mul(multiplier).ok_or_else(invalid)?;
        Self::from_seconds(seconds).map_err(|_| invalid())
    }

    /// Width in seconds.
    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    /// Width in milliseconds.
    pub fn millis(&self) -> i64 {
        // MAX_SECONDS keeps this well inside i64.
        self.seconds as i64 * 1_000
    }

    /// Width as a `time::Duration`.
    pub fn as_duration(&self) -> Duration {
        Duration::seconds(self.seconds as i64)
    }

    /// Floor `t` to the start of the bucket containing it.
    pub fn truncate(&self, t: OffsetDateTime) -> OffsetDateTime {
        let rem = to_unix_millis(t).rem_euclid(self.millis());
        let nanos_into_ms = i64::from(t.nanosecond() % 1_000_000);
        t.saturating_sub(Duration::milliseconds(rem) + Duration::nanoseconds(nanos_into_ms))
            .to_offset(UtcOffset::UTC)
    }

    /// Exclusive end of the bucket range covering everything before `t`.
    ///
    /// Returns `t` unchanged when it already sits on a bucket boundary, and
    /// the start of the next bucket otherwise.
    pub fn align_end(&self, t: OffsetDateTime) -> OffsetDateTime {
        let floored = self.truncate(t);
        if floored == t {
            floored
        } else {
            floored.saturating_add(self.as_duration())
        }
    }
}

impl Default for BucketWidth {
    /// Five minutes.
    fn default() -> Self {
        Self { seconds: 300 }
    }
}

impl FromStr for BucketWidth {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.seconds;
        if s % 86_400 == 0 {
            write!(f, "{}d", s / 86_400)
        } else if s % 3_600 == 0 {
            write!(f, "{}h", s / 3_600)
        } else if s % 60 == 0 {
            write!(f, "{}m", s / 60)
        } else {
            write!(f, "{s}s")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(BucketWidth::parse("30s").unwrap().seconds(), 30);
        assert_eq!(BucketWidth::parse("5m").unwrap().seconds(), 300);
        assert_eq!(BucketWidth::parse("2h").unwrap().seconds(), 7_200);
        assert_eq!(BucketWidth::parse("1d").unwrap().seconds(), 86_400);
        assert_eq!(BucketWidth::parse("1D").unwrap().seconds(), 86_400);
        assert_eq!(BucketWidth::parse(" 15m ").unwrap().seconds(), 900);
    }

    #[test]
    fn test_parse_bare_seconds() {
        assert_eq!(BucketWidth::parse("300").unwrap().seconds(), 300);
        assert_eq!(BucketWidth::parse("1").unwrap().seconds(), 1);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for raw in ["", "m", "0", "0m", "-5m", "5x", "five", "1.5h", "99999999999999999999d"] {
            let err = BucketWidth::parse(raw).unwrap_err();
            assert!(matches!(err, ParseError::InvalidBucket(_)), "{raw}");
        }
    }

    #[test]
    fn test_default_is_five_minutes() {
        assert_eq!(BucketWidth::default().seconds(), 300);
        assert_eq!(BucketWidth::default().to_string(), "5m");
    }

    #[test]
    fn test_display() {
        assert_eq!(BucketWidth::parse("90").unwrap().to_string(), "90s");
        assert_eq!(BucketWidth::parse("120").unwrap().to_string(), "2m");
        assert_eq!(BucketWidth::parse("60m").unwrap().to_string(), "1h");
        assert_eq!(BucketWidth::parse("48h").unwrap().to_string(), "2d");
    }

    #[test]
    fn test_truncate_floors_to_epoch_boundary() {
        let w = BucketWidth::minutes(5).unwrap();
        assert_eq!(
            w.truncate(datetime!(2024-01-01 00:03:00 UTC)),
            datetime!(2024-01-01 00:00:00 UTC)
        );
        assert_eq!(
            w.truncate(datetime!(2024-01-01 00:09:59.999 UTC)),
            datetime!(2024-01-01 00:05:00 UTC)
        );
        assert_eq!(
            w.truncate(datetime!(2024-01-01 00:10:00 UTC)),
            datetime!(2024-01-01 00:10:00 UTC)
        );
    }

    #[test]
    fn test_truncate_normalizes_offset() {
        let w = BucketWidth::parse("1h").unwrap();
        let t = datetime!(2024-01-01 02:30:00 +02:00);
        assert_eq!(w.truncate(t), datetime!(2024-01-01 00:00:00 UTC));
    }

    #[test]
    fn test_truncate_before_epoch() {
        let w = BucketWidth::parse("1h").unwrap();
        assert_eq!(
            w.truncate(datetime!(1969-12-31 23:30:00 UTC)),
            datetime!(1969-12-31 23:00:00 UTC)
        );
    }

    #[test]
    fn test_truncate_drops_sub_millisecond_part() {
        let w = BucketWidth::parse("1s").unwrap();
        let t = datetime!(2024-01-01 00:00:01.000_500 UTC);
        assert_eq!(w.truncate(t), datetime!(2024-01-01 00:00:01 UTC));
    }

    #[test]
    fn test_align_end() {
        let w = BucketWidth::minutes(5).unwrap();
        assert_eq!(
            w.align_end(datetime!(2024-01-01 00:08:00 UTC)),
            datetime!(2024-01-01 00:10:00 UTC)
        );
        assert_eq!(
            w.align_end(datetime!(2024-01-01 00:10:00 UTC)),
            datetime!(2024-01-01 00:10:00 UTC)
        );
    }
}
