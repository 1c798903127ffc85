//! Timestamp column encoding.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (`Z` suffix,
//! millisecond precision) so lexicographic comparison in SQL matches
//! chronological order.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp.
pub fn parse_ts(text: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.to_utc())
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {text:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_is_lexicographically_ordered() {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let earlier = format_ts(base + chrono::Duration::milliseconds(500));
        let later = format_ts(base + chrono::Duration::seconds(1));
        assert!(earlier < later);
    }

    #[test]
    fn roundtrip() {
        let now = Utc::now();
        let parsed = parse_ts(&format_ts(now)).unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
    }
}
