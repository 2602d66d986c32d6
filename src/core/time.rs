//! Shared timestamp/event helpers for protocol envelopes and ledger records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ulid::Ulid;

/// Returns the current instant as RFC 3339 with a `Z` suffix.
pub fn now_rfc3339() -> String {
    format_rfc3339(Utc::now())
}

pub fn format_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 (offset or `Z`), naive date-times (read as UTC, `T` or
/// space separated, optional fractional seconds) and bare dates.
pub fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    // Offsets without a colon (`+0000`) are ISO-8601 but not RFC 3339.
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Ordering key for raw timestamps: unparseable values sort before any real instant.
pub fn ordering_key(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(parse_iso8601)
}

/// UTC calendar day bucket (`YYYY-MM-DD`) used for per-day counters.
pub fn day_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}
