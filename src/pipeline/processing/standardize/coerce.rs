//! Value coercion. Every function here is total: a value that cannot be
//! coerced becomes `None` and the caller nulls it and counts the failure.

use super::columns::FieldType;
use crate::domain::Value;
use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Spellings providers use for "no value". Not counted as failures.
const MISSING_MARKERS: &[&str] = &["", "nan", "null", "none", "n/a", "na", "-", "."];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];

/// Epoch values at or above this magnitude are milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

pub fn is_missing_marker(s: &str) -> bool {
    let t = s.trim();
    MISSING_MARKERS.iter().any(|m| t.eq_ignore_ascii_case(m))
}

/// Coerce one value to `ty`. Null stays null.
pub fn coerce(value: &Value, ty: FieldType, tz: Tz) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }
    if let Value::Text(s) = value {
        // Identifiers like "NA" are legitimate text; only blank text is missing there.
        if is_missing_marker(s) && (ty != FieldType::Text || s.trim().is_empty()) {
            return Some(Value::Null);
        }
    }
    match ty {
        FieldType::Float => to_float(value).map(Value::Float),
        FieldType::Int => to_int(value),
        FieldType::Text => Some(to_text(value)),
        FieldType::Timestamp => to_timestamp(value, tz).map(Value::Timestamp),
        FieldType::DateLike => to_date_like(value, tz),
    }
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => parse_number(s),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
}

fn to_int(value: &Value) -> Option<Value> {
    match value {
        Value::Int(i) => Some(Value::Int(*i)),
        Value::Text(s) => {
            if let Ok(i) = s.trim().parse::<i64>() {
                return Some(Value::Int(i));
            }
            parse_number(s).map(integral_or_float)
        }
        other => to_float(other).map(integral_or_float),
    }
}

fn integral_or_float(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::Int(f as i64)
    } else {
        Value::Float(f)
    }
}

fn to_text(value: &Value) -> Value {
    match value {
        Value::Text(s) => Value::Text(s.trim().to_string()),
        Value::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => {
            Value::Text(format!("{}", *f as i64))
        }
        other => Value::Text(other.to_string()),
    }
}

/// Interpret a naive local time in `tz`. A time skipped by a DST jump is read
/// one hour later; an ambiguous one resolves to the earlier instant.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
    }
}

fn from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() {
        return None;
    }
    let millis = if raw.abs() >= EPOCH_MILLIS_THRESHOLD {
        raw
    } else {
        raw * 1000.0
    };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

fn midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    localize(date.and_time(chrono::NaiveTime::MIN), tz)
}

pub fn to_timestamp(value: &Value, tz: Tz) -> Option<DateTime<Utc>> {
    match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Date(d) => Some(midnight(*d, tz)),
        Value::Int(i) => from_epoch(*i as f64),
        Value::Float(f) => from_epoch(*f),
        Value::Text(s) => parse_timestamp_text(s.trim(), tz),
        _ => None,
    }
}

fn parse_timestamp_text(s: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    if let Some(naive) = parse_naive_datetime(s) {
        return Some(localize(naive, tz));
    }
    if let Some(date) = parse_date(s) {
        return Some(midnight(date, tz));
    }
    s.parse::<f64>().ok().and_then(from_epoch)
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn to_date_like(value: &Value, tz: Tz) -> Option<Value> {
    match value {
        Value::Date(d) => Some(Value::Date(*d)),
        Value::Text(s) => match parse_date(s.trim()) {
            Some(d) => Some(Value::Date(d)),
            None => parse_timestamp_text(s.trim(), tz).map(Value::Timestamp),
        },
        other => to_timestamp(other, tz).map(Value::Timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const UTC: Tz = chrono_tz::UTC;

    #[test]
    fn floats_from_text_and_ints() {
        assert_eq!(coerce(&Value::from("1,234.5"), FieldType::Float, UTC), Some(Value::Float(1234.5)));
        assert_eq!(coerce(&Value::Int(3), FieldType::Float, UTC), Some(Value::Float(3.0)));
        assert_eq!(coerce(&Value::from("abc"), FieldType::Float, UTC), None);
        assert_eq!(coerce(&Value::from("N/A"), FieldType::Float, UTC), Some(Value::Null));
    }

    #[test]
    fn ints_keep_fractional_values_as_float() {
        assert_eq!(coerce(&Value::Float(1000.0), FieldType::Int, UTC), Some(Value::Int(1000)));
        assert_eq!(coerce(&Value::Float(10.5), FieldType::Int, UTC), Some(Value::Float(10.5)));
        assert_eq!(coerce(&Value::from("42"), FieldType::Int, UTC), Some(Value::Int(42)));
    }

    #[test]
    fn text_trims_and_formats_integral_floats() {
        assert_eq!(coerce(&Value::from(" AAPL "), FieldType::Text, UTC), Some(Value::from("AAPL")));
        assert_eq!(coerce(&Value::Float(12.0), FieldType::Text, UTC), Some(Value::from("12")));
    }

    #[test]
    fn naive_timestamps_use_default_timezone() {
        let ny: Tz = "America/New_York".parse().unwrap();
        let ts = to_timestamp(&Value::from("2024-01-02 09:30:00"), ny).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap());
        // Explicit offsets win over the default.
        let ts = to_timestamp(&Value::from("2024-01-02T09:30:00+00:00"), ny).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap());
    }

    #[test]
    fn epoch_seconds_and_millis() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_timestamp(&Value::Int(1_704_067_200), UTC), Some(expected));
        assert_eq!(to_timestamp(&Value::Int(1_704_067_200_000), UTC), Some(expected));
    }

    #[test]
    fn date_like_keeps_pure_dates() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(to_date_like(&Value::from("2024-01-01"), UTC), Some(Value::Date(d)));
        assert!(matches!(
            to_date_like(&Value::from("2024-01-01 10:00:00"), UTC),
            Some(Value::Timestamp(_))
        ));
    }

    #[test]
    fn dst_gap_moves_forward() {
        let ny: Tz = "America/New_York".parse().unwrap();
        let naive = NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        assert_eq!(localize(naive, ny), Utc.with_ymd_and_hms(2024, 3, 10, 7, 30, 0).unwrap());
    }
}
