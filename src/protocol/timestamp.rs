//! Lenient timestamp parsing for files written by other agents.
//!
//! Timestamps are written as RFC 3339 UTC. Older agents write naive ISO 8601
//! local time (`2026-01-05T14:03:22.120344`), which is read as local time.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parse an RFC 3339 or naive ISO 8601 timestamp.
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(value, NAIVE_FORMAT).ok()?;
    // A local time inside a DST gap has no mapping; read it as UTC
    Some(
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|at| at.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc()),
    )
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", value)))
}

pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(value) => parse(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", value))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_rfc3339() {
        let at = parse("2026-01-05T14:03:22.120344+00:00").unwrap();
        assert_eq!(at.hour(), 14);
        assert_eq!(at.nanosecond(), 120_344_000);

        let offset = parse("2026-01-05T16:03:22+02:00").unwrap();
        assert_eq!(offset.hour(), 14);
    }

    #[test]
    fn test_parse_naive_as_local() {
        let naive = NaiveDateTime::parse_from_str("2026-01-05T14:03:22.120344", NAIVE_FORMAT).unwrap();
        let expected = Local
            .from_local_datetime(&naive)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(parse("2026-01-05T14:03:22.120344"), Some(expected));
        // Python omits the fraction when it is zero
        assert!(parse("2026-01-05T14:03:22").is_some());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse("yesterday"), None);
        assert_eq!(parse(""), None);
    }
}
