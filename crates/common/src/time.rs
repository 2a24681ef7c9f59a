// crates/common/src/time.rs
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Parse an ISO-ish timestamp into epoch milliseconds.
///
/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.fff]` (read as UTC) and
/// bare dates (midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn parse_timestamp_ms(value: &str) -> Option<i64> {
    parse_timestamp(value).map(|dt| dt.timestamp_millis())
}

pub fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

/// Current UTC calendar date as `YYYY-MM-DD`.
pub fn today_utc() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

pub fn is_valid_date(value: &str) -> bool {
    value.len() == 10 && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!(parse_timestamp_ms("1970-01-01T00:00:01Z"), Some(1000));
        assert_eq!(parse_timestamp_ms("1970-01-01T00:00:01.500+00:00"), Some(1500));
        assert_eq!(parse_timestamp_ms("1970-01-01T00:00:02"), Some(2000));
        assert_eq!(parse_timestamp_ms("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_timestamp_ms("yesterday"), None);
        assert_eq!(parse_timestamp_ms(""), None);
    }

    #[test]
    fn test_dates() {
        assert!(is_valid_date(&today_utc()));
        assert!(is_valid_date("2024-02-29"));
        assert!(!is_valid_date("2023-02-29"));
        assert!(!is_valid_date("2024-1-1"));
    }

    #[test]
    fn test_rfc3339_roundtrip_is_stable() {
        let dt = parse_timestamp("2024-05-01T10:00:00+02:00").unwrap();
        assert_eq!(to_rfc3339(dt), "2024-05-01T08:00:00.000Z");
    }
}
