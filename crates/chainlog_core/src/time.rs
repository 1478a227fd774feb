//! Wall-clock time for log entries.
//!
//! Timestamps are truncated to microseconds at creation so the value that is
//! hashed, persisted and re-read is always the same instant.

use chrono::{DateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current wall-clock time
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Wrap a chrono datetime, truncating to microseconds
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(6))
    }

    /// Build from seconds and microseconds since the Unix epoch
    ///
    /// # Errors
    ///
    /// Returns error if the value is out of chrono's range
    pub fn from_unix_micros(micros: i64) -> Result<Self, CoreError> {
        Utc.timestamp_micros(micros)
            .single()
            .map(Self)
            .ok_or_else(|| CoreError::InvalidTimestamp {
                reason: format!("{micros} micros is out of range"),
            })
    }

    /// Microseconds since the Unix epoch
    #[must_use]
    pub fn as_unix_micros(&self) -> i64 {
        self.0.timestamp_micros()
    }

    /// Inner chrono value
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Canonical text form used for hashing: RFC 3339, microseconds, `Z`
    #[must_use]
    pub fn canonical(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// The later of two timestamps
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if other > self { other } else { self }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for Timestamp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self::from_datetime(dt.with_timezone(&Utc)))
            .map_err(|e| CoreError::InvalidTimestamp {
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_format() {
        let ts = Timestamp::from_unix_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(ts.canonical(), "2023-11-14T22:13:20.123456Z");
    }

    #[test]
    fn test_now_is_truncated_to_micros() {
        let ts = Timestamp::now();
        assert_eq!(ts.as_datetime().timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_parse_roundtrip() {
        let ts = Timestamp::from_unix_micros(42).unwrap();
        let parsed: Timestamp = ts.canonical().parse().unwrap();
        assert_eq!(ts, parsed);
    }

    #[test]
    fn test_parse_invalid() {
        assert!("yesterday".parse::<Timestamp>().is_err());
    }

    #[test]
    fn test_max() {
        let early = Timestamp::from_unix_micros(1).unwrap();
        let late = Timestamp::from_unix_micros(2).unwrap();
        assert_eq!(early.max(late), late);
        assert_eq!(late.max(early), late);
    }
}
