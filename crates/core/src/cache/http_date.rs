//! HTTP date parsing and formatting

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC_850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

/// Parse an HTTP date in IMF-fixdate, RFC 850 or asctime form, falling back
/// to RFC 2822
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    [IMF_FIXDATE, RFC_850, ASCTIME]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
        .or_else(|| {
            DateTime::parse_from_rfc2822(value).ok().map(|dt| dt.with_timezone(&Utc))
        })
}

/// Format as IMF-fixdate, the form servers expect in `If-Modified-Since`
pub fn format_http_date(value: DateTime<Utc>) -> String {
    value.format(IMF_FIXDATE).to_string()
}

/// `Retry-After` as a delay from `now`: delta seconds or an HTTP date
///
/// Dates in the past yield zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    parse_http_date(value).map(|at| (at - now).to_std().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap()
    }

    #[test]
    fn test_all_three_forms() {
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(reference()));
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), Some(reference()));
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), Some(reference()));
    }

    #[test]
    fn test_rfc2822_fallback_and_garbage() {
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 09:49:37 +0100"), Some(reference()));
        assert_eq!(parse_http_date("0"), None);
        assert_eq!(parse_http_date("tomorrow"), None);
    }

    #[test]
    fn test_format_round_trip() {
        assert_eq!(format_http_date(reference()), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&format_http_date(reference())), Some(reference()));
    }

    #[test]
    fn test_retry_after() {
        let now = reference();
        assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after("Sun, 06 Nov 1994 08:50:07 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(parse_retry_after("Sun, 06 Nov 1994 08:00:00 GMT", now), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("soon", now), None);
    }
}
