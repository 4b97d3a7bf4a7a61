//! Timestamp-derived identifiers and date-title parsing.
//!
//! # Responsibility
//! - Generate document ids shaped like RFC 3339 UTC timestamps.
//! - Decide whether a collection title denotes a calendar date.
//!
//! # Invariants
//! - Ids issued by one process are strictly increasing, even when several are
//!   requested within the same millisecond.
//! - Formatted timestamps always use millisecond precision and a `Z` suffix.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_ISSUED_MS: AtomicI64 = AtomicI64::new(0);

/// Returns a fresh timestamp-derived id, e.g. `2024-01-01T09:30:00.123Z`.
///
/// When the wall clock has not advanced since the previous call, the id is
/// bumped by one millisecond so ids never repeat within a process.
pub fn generate_id() -> String {
    let now = Utc::now().timestamp_millis();
    let mut previous = LAST_ISSUED_MS.load(Ordering::Relaxed);
    loop {
        let next = if now > previous { now } else { previous + 1 };
        match LAST_ISSUED_MS.compare_exchange_weak(
            previous,
            next,
            Ordering::SeqCst,
            Ordering::Relaxed,
        ) {
            Ok(_) => return format_timestamp_ms(next),
            Err(actual) => previous = actual,
        }
    }
}

/// Formats epoch milliseconds as an RFC 3339 UTC timestamp.
pub fn format_timestamp_ms(epoch_ms: i64) -> String {
    match Utc.timestamp_millis_opt(epoch_ms).single() {
        Some(value) => format_timestamp(&value),
        None => epoch_ms.to_string(),
    }
}

/// Formats a UTC instant with millisecond precision and a `Z` suffix.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a collection title (or bullet date) as a calendar instant.
///
/// Accepted shapes:
/// - RFC 3339 timestamps (`2024-01-01T00:00:00.000Z`, `2024-01-01T08:00:00+02:00`)
/// - naive timestamps (`2024-01-01T00:00:00`), read as UTC
/// - plain dates (`2024-01-01`)
/// - month titles (`January 2024`), read as the first day of that month
pub fn parse_date_title(title: &str) -> Option<DateTime<Utc>> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(value.with_timezone(&Utc));
    }
    if let Ok(value) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&value));
    }
    if let Ok(value) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return value.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    if let Ok(value) = NaiveDate::parse_from_str(&format!("1 {trimmed}"), "%d %B %Y") {
        return value.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }

    None
}

/// Returns the UTC start-of-day timestamp for a date string.
///
/// Returns `None` when `date` is not a recognizable date.
pub fn start_of_day(date: &str) -> Option<String> {
    let parsed = parse_date_title(date)?;
    let midnight = parsed.date_naive().and_hms_opt(0, 0, 0)?;
    Some(format_timestamp(&Utc.from_utc_datetime(&midnight)))
}
