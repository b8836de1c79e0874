//! Typed coercion of loosely-typed detector fields.
//!
//! Detectors disagree on how they encode times and scores, so every helper
//! here returns `None` instead of failing. Callers decide on fallbacks.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Interpret a JSON value as a detection time.
///
/// Numbers are epoch seconds (fractions allowed). Strings are ISO-8601 with
/// any trailing `Z` removed first; a naive time is taken as UTC and an
/// explicit offset is converted to UTC.
pub fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => n.as_f64().and_then(epoch_seconds),
        Value::String(s) => parse_iso8601(s),
        _ => None,
    }
}

/// First candidate that parses as a timestamp
pub fn first_timestamp<'a>(candidates: impl IntoIterator<Item = Option<&'a Value>>) -> Option<DateTime<Utc>> {
    candidates.into_iter().flatten().find_map(parse_timestamp)
}

fn epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    // rounding can push the fraction to a full second
    let (whole, nanos) = if nanos >= 1_000_000_000 { (whole + 1.0, 0) } else { (whole, nanos) };
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(whole as i64, nanos)
}

fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim().trim_end_matches('Z');
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Interpret a JSON value as a detector score
pub fn coerce_confidence(raw: &Value) -> Option<f64> {
    let value = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// First candidate that coerces to a score
pub fn first_confidence<'a>(candidates: impl IntoIterator<Item = Option<&'a Value>>) -> Option<f64> {
    candidates.into_iter().flatten().find_map(coerce_confidence)
}

/// Non-empty string form of an identifier that may arrive as a number
pub fn identifier(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Value worth copying into metadata: not null, empty or false
pub fn is_present(raw: &Value) -> bool {
    match raw {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn epoch_seconds_are_utc() {
        let ts = parse_timestamp(&json!(1_714_566_600)).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap());

        let ts = parse_timestamp(&json!(1_714_566_600.25)).unwrap();
        assert_eq!(ts.timestamp(), 1_714_566_600);
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn iso_strings_with_and_without_zulu() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2024-05-01T12:30:00Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-05-01T12:30:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-05-01 12:30:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-05-01T14:30:00+02:00")), Some(expected));
    }

    #[test]
    fn fractional_iso_seconds() {
        let ts = parse_timestamp(&json!("2024-05-01T12:30:00.500Z")).unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn unusable_timestamps() {
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!("")), None);
        assert_eq!(parse_timestamp(&json!(null)), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
        assert_eq!(parse_timestamp(&json!({"secs": 1})), None);
    }

    #[test]
    fn first_timestamp_skips_unparseable_candidates() {
        let bad = json!("garbage");
        let good = json!(1_714_566_600);
        let ts = first_timestamp([None, Some(&bad), Some(&good)]).unwrap();
        assert_eq!(ts.timestamp(), 1_714_566_600);
        assert_eq!(first_timestamp([None, Some(&bad)]), None);
    }

    #[test]
    fn confidence_coercion() {
        assert_eq!(coerce_confidence(&json!(0.82)), Some(0.82));
        assert_eq!(coerce_confidence(&json!(1)), Some(1.0));
        assert_eq!(coerce_confidence(&json!(" 0.5 ")), Some(0.5));
        assert_eq!(coerce_confidence(&json!("high")), None);
        assert_eq!(coerce_confidence(&json!("NaN")), None);
        assert_eq!(coerce_confidence(&json!(null)), None);
        assert_eq!(coerce_confidence(&json!([0.5])), None);
    }

    #[test]
    fn first_confidence_never_substitutes_zero() {
        let junk = json!("n/a");
        assert_eq!(first_confidence([Some(&junk), None]), None);

        let zero = json!(0.0);
        let score = json!(0.7);
        assert_eq!(first_confidence([Some(&zero), Some(&score)]), Some(0.0));
    }

    #[test]
    fn identifiers_accept_strings_and_numbers() {
        assert_eq!(identifier(&json!("gate")), Some("gate".to_string()));
        assert_eq!(identifier(&json!(3)), Some("3".to_string()));
        assert_eq!(identifier(&json!("  ")), None);
        assert_eq!(identifier(&json!(null)), None);
    }
}
