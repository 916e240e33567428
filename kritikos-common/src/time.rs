//! Timestamp utilities
//!
//! Timestamps are stored as RFC3339 UTC strings with second precision
//! (`2025-03-01T12:00:00Z`). The fixed width keeps them lexicographically
//! ordered, so SQL comparisons against a formatted cutoff are valid.

use chrono::{DateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current time formatted for storage
pub fn now_db_timestamp() -> String {
    to_db_timestamp(now())
}

/// Parse a stored timestamp, returning None for malformed values
pub fn parse_db_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Storage timestamp `days` before now
pub fn days_ago_db_timestamp(days: i64) -> String {
    to_db_timestamp(now() - chrono::Duration::days(days))
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}
