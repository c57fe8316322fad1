//! Timestamp and duration normalization.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Canonical timestamp format of every emitted time column
pub const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Formats tried in order after whitespace has been collapsed
const TIMESTAMP_FORMATS: [&str; 9] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    // ctime, as printed by qacct
    "%a %b %d %H:%M:%S %Y",
    // PBS accounting and newer qacct
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    // LSF -o with year display
    "%Y/%m/%d-%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%b %d %H:%M:%S %Y",
];

/// Values schedulers print for "no time"
fn is_absent(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "" | "-" | "-/-" | "0" | "unknown" | "none" | "n/a" | "undefined"
    )
}

/// Parse any of the supported timestamp spellings.
///
/// Epoch seconds are read as UTC; zone-qualified ISO-8601 keeps its wall-clock
/// time; everything else is taken as local scheduler time and kept as written.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if is_absent(raw) {
        return None;
    }

    if raw.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        let secs = raw.parse::<f64>().ok()?;
        if secs <= 0.0 {
            return None;
        }
        return DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0).map(|dt| dt.naive_utc());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }

    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&collapsed, format).ok())
}

/// Render a timestamp in the canonical format
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(CANONICAL_FORMAT).to_string()
}

/// Parse a duration to whole seconds.
///
/// Accepts `[D-]HH:MM:SS[.fff]`, `MM:SS[.fff]`, plain or fractional seconds,
/// and a trailing `s` / `sec` / `second(s)` unit.
pub fn parse_duration_secs(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "-" || raw.eq_ignore_ascii_case("unknown") || raw.eq_ignore_ascii_case("undefined") {
        return None;
    }

    let lower = raw.to_ascii_lowercase();
    let number = ["second(s)", "seconds", "second", "secs", "sec", "s"]
        .iter()
        .find_map(|unit| lower.strip_suffix(unit))
        .unwrap_or(&lower)
        .trim();

    if !number.contains(':') {
        let secs = number.parse::<f64>().ok()?;
        return (secs >= 0.0).then(|| secs.round() as u64);
    }

    let (days, clock) = match number.split_once('-') {
        Some((days, clock)) => (days.parse::<u64>().ok()?, clock),
        None => (0, number),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, *s),
        [m, s] => (0, m.parse::<u64>().ok()?, *s),
        _ => return None,
    };
    let seconds = seconds.parse::<f64>().ok()?;
    if seconds < 0.0 {
        return None;
    }

    days.checked_mul(86_400)?
        .checked_add(hours.checked_mul(3_600)?)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(raw: &str) -> Option<String> {
        parse_timestamp(raw).map(|ts| format_timestamp(&ts))
    }

    #[test]
    fn test_timestamp_spellings() {
        assert_eq!(canonical("2024-03-01T08:15:00").as_deref(), Some("2024-03-01T08:15:00"));
        assert_eq!(canonical("2024-03-01 08:15:00.123").as_deref(), Some("2024-03-01T08:15:00"));
        assert_eq!(canonical("Mon Jan  1 10:00:00 2024").as_deref(), Some("2024-01-01T10:00:00"));
        assert_eq!(canonical("04/12/2024 10:30:00").as_deref(), Some("2024-04-12T10:30:00"));
        assert_eq!(canonical("1704103200").as_deref(), Some("2024-01-01T10:00:00"));
        assert_eq!(canonical("2024-03-01T08:15:00+02:00").as_deref(), Some("2024-03-01T08:15:00"));
    }

    #[test]
    fn test_absent_timestamps() {
        for raw in ["", "Unknown", "None", "0", "-", "-/-"] {
            assert_eq!(parse_timestamp(raw), None, "{raw}");
        }
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_durations() {
        assert_eq!(parse_duration_secs("01:02:03"), Some(3_723));
        assert_eq!(parse_duration_secs("2-00:00:01"), Some(172_801));
        assert_eq!(parse_duration_secs("05:30.600"), Some(331));
        assert_eq!(parse_duration_secs("3600"), Some(3_600));
        assert_eq!(parse_duration_secs("123.4s"), Some(123));
        assert_eq!(parse_duration_secs("42 second(s)"), Some(42));
        assert_eq!(parse_duration_secs("-"), None);
        assert_eq!(parse_duration_secs("1:xx:00"), None);
    }

    #[test]
    fn test_duration_overflow_is_empty() {
        assert_eq!(parse_duration_secs("300000000000000-00:00:00"), None);
        assert_eq!(parse_duration_secs("5124095576030432:00:00"), None);
        assert_eq!(parse_duration_secs("213503982334601-00:00:00"), Some(18_446_744_073_709_526_400));
    }
}
