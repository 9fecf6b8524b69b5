//! Pure timestamp arithmetic
//!
//! All timestamps in Engram are ISO-8601 UTC strings normalized to
//! millisecond precision (`2024-05-01T12:00:00.000Z`). Normalized strings of
//! equal length order lexicographically the same way they order in time, so
//! plain string comparison is the ordering primitive throughout the system.
//!
//! Nothing here reads the wall clock; absent timestamps default to [`EPOCH`].

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Default timestamp for absent values.
pub const EPOCH: &str = "1970-01-01T00:00:00.000Z";

/// Parse an ISO-8601 timestamp and normalize to millisecond-`Z` form.
///
/// Returns `None` when the input does not parse.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    Some(
        parsed
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

/// Add whole days to a normalized timestamp.
///
/// Falls back to [`EPOCH`] arithmetic when the input does not parse, so the
/// result is always a valid normalized timestamp.
pub fn add_days(timestamp: &str, days: i64) -> String {
    let base = DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    (base + Duration::days(days)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Whole days elapsed from `earlier` to `later`, clamped at zero.
pub fn age_days(earlier: &str, later: &str) -> i64 {
    let from = DateTime::parse_from_rfc3339(earlier)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let to = DateTime::parse_from_rfc3339(later)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    (to - from).num_days().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_millisecond_z_form() {
        assert_eq!(
            normalize_timestamp("2024-05-01T12:00:00+02:00").as_deref(),
            Some("2024-05-01T10:00:00.000Z")
        );
        assert_eq!(
            normalize_timestamp("1970-01-01T00:00:00Z").as_deref(),
            Some(EPOCH)
        );
        assert_eq!(normalize_timestamp("not a date"), None);
    }

    #[test]
    fn subsecond_precision_truncates_to_millis() {
        assert_eq!(
            normalize_timestamp("2024-05-01T12:00:00.123456Z").as_deref(),
            Some("2024-05-01T12:00:00.123Z")
        );
    }

    #[test]
    fn add_days_rolls_calendar() {
        assert_eq!(
            add_days("2024-02-28T00:00:00.000Z", 2),
            "2024-03-01T00:00:00.000Z"
        );
        assert_eq!(add_days("garbage", 1), "1970-01-02T00:00:00.000Z");
    }

    #[test]
    fn age_days_clamps_negative() {
        assert_eq!(
            age_days("2024-01-01T00:00:00.000Z", "2024-04-10T00:00:00.000Z"),
            100
        );
        assert_eq!(
            age_days("2024-04-10T00:00:00.000Z", "2024-01-01T00:00:00.000Z"),
            0
        );
    }
}
