//! Timestamp coercion to timezone-naive UTC

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Parse a source timestamp into timezone-naive UTC.
///
/// Accepted shapes, tried in order: RFC 3339 with offset (converted to UTC,
/// offset stripped), naive ISO with optional fractional seconds (assumed UTC,
/// never reinterpreted in local time), space-separated datetime, bare date
/// (midnight). Returns None when nothing matches; callers drop the record
/// and log.
pub fn to_utc_naive(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }

    None
}

/// Combine a calendar date string with a bare time-of-day string
pub fn combine_date_time(date: &str, time: &str) -> Option<NaiveDateTime> {
    to_utc_naive(&format!("{}T{}", date.trim(), time.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_naive_iso_assumed_utc() {
        let dt = to_utc_naive("2024-01-01T08:30:00").unwrap();
        assert_eq!(dt.to_string(), "2024-01-01 08:30:00");
    }

    #[test]
    fn test_offset_converted_to_utc() {
        // +05:30 means the UTC instant is 5h30m earlier
        let dt = to_utc_naive("2024-01-01T08:30:00+05:30").unwrap();
        assert_eq!(dt.to_string(), "2024-01-01 03:00:00");

        let z = to_utc_naive("2024-01-01T08:30:00Z").unwrap();
        assert_eq!(z.to_string(), "2024-01-01 08:30:00");
    }

    #[test]
    fn test_fractional_seconds() {
        let dt = to_utc_naive("2024-01-01T00:00:00.000").unwrap();
        assert_eq!(dt.nanosecond(), 0);
        assert_eq!(dt.to_string(), "2024-01-01 00:00:00");
    }

    #[test]
    fn test_date_only_is_midnight() {
        let dt = to_utc_naive("2024-01-05").unwrap();
        assert_eq!(dt.to_string(), "2024-01-05 00:00:00");
    }

    #[test]
    fn test_space_separated() {
        let dt = to_utc_naive("2024-01-02 00:00:00").unwrap();
        assert_eq!(dt.to_string(), "2024-01-02 00:00:00");
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(to_utc_naive("").is_none());
        assert!(to_utc_naive("not-a-timestamp").is_none());
        assert!(to_utc_naive("08:30:00").is_none());
    }

    #[test]
    fn test_combine_date_and_time() {
        let dt = combine_date_time("2024-01-01", "08:01:00").unwrap();
        assert_eq!(dt.to_string(), "2024-01-01 08:01:00");
        assert!(combine_date_time("", "08:01:00").is_none());
    }
}
