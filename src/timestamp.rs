//! ISO-8601 timestamp parsing and duration arithmetic.
//!
//! Event and telemetry timestamps are strings; anything that fails to parse
//! yields `None` rather than an error.
use chrono::{DateTime, NaiveDateTime, Utc};
use std::cmp::Ordering;

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 (`Z` or a numeric offset) and naive date-times, which
/// are read as UTC.
pub fn parse(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Milliseconds from `start` to `end`, truncated toward zero.
///
/// `None` when either side is missing or unparsable.
pub fn duration_ms(start: Option<&str>, end: Option<&str>) -> Option<i64> {
    let start = parse(start?)?;
    let end = parse(end?)?;
    Some((end - start).num_milliseconds())
}

/// Order two timestamps, by instant when both parse, lexically otherwise.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// True when `ts` lies strictly between `lo` and `hi`.
pub fn strictly_between(lo: &str, ts: &str, hi: &str) -> bool {
    compare(lo, ts) == Ordering::Less && compare(ts, hi) == Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_zulu_and_offset_agree() {
        let z = parse("2026-02-01T10:00:00.500Z").unwrap();
        let off = parse("2026-02-01T10:00:00.500+00:00").unwrap();
        assert_eq!(z, off);
    }

    #[test]
    fn parse_naive_as_utc() {
        let naive = parse("2026-02-01T10:00:00").unwrap();
        assert_eq!(naive, parse("2026-02-01T10:00:00Z").unwrap());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("").is_none());
        assert!(parse("yesterday").is_none());
    }

    #[test]
    fn duration_between_timestamps() {
        let d = duration_ms(
            Some("2026-02-01T10:00:00.000Z"),
            Some("2026-02-01T10:01:30.250Z"),
        );
        assert_eq!(d, Some(90_250));
    }

    #[test]
    fn duration_across_offsets() {
        let d = duration_ms(
            Some("2026-02-01T10:00:00+01:00"),
            Some("2026-02-01T09:00:01Z"),
        );
        assert_eq!(d, Some(1_000));
    }

    #[test]
    fn duration_missing_side_is_none() {
        assert_eq!(duration_ms(None, Some("2026-02-01T10:00:00Z")), None);
        assert_eq!(duration_ms(Some("2026-02-01T10:00:00Z"), None), None);
        assert_eq!(duration_ms(Some("bogus"), Some("2026-02-01T10:00:00Z")), None);
    }

    #[test]
    fn strictly_between_excludes_endpoints() {
        let lo = "2026-02-01T10:00:00Z";
        let hi = "2026-02-01T10:05:00Z";
        assert!(strictly_between(lo, "2026-02-01T10:02:00Z", hi));
        assert!(!strictly_between(lo, lo, hi));
        assert!(!strictly_between(lo, hi, hi));
        assert!(!strictly_between(lo, "2026-02-01T10:06:00Z", hi));
    }
}
