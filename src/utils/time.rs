use chrono::{DateTime, Utc};

/// Absolute whole minutes between two instants.
pub fn minutes_between(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    a.signed_duration_since(b).num_minutes().abs()
}

/// Inclusive on both ends.
pub fn is_within(at: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    start <= at && at <= end
}

/// Whole seconds from `now` until `at`, zero when `at` has passed.
pub fn seconds_until(at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from(at.signed_duration_since(now).num_seconds()).unwrap_or(0)
}

/// IMF-fixdate as used by `Retry-After` (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
