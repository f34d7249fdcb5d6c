use chrono::{DateTime, Utc};

/// Timestamp format used in every persisted column: UTC, millisecond
/// precision, zero-padded.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Current UTC time as a `YYYY-MM-DD HH:MM:SS.mmm` string.
pub fn now_string() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}
