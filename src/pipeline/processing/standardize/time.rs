use super::coerce::to_timestamp;
use crate::domain::{RecordSet, Value};
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;

/// Time-bearing columns in the order they are preferred.
const TIME_SOURCES: &[&str] = &["timestamp", "date", "datetime"];

/// Columns derived from `timestamp`; together with it, the leading block of
/// every canonical record.
pub const TIME_FAMILY: &[&str] = &[
    "timestamp",
    "date",
    "time",
    "year",
    "month",
    "day",
    "hour",
    "minute",
    "day_of_week",
    "day_of_year",
    "week_of_year",
];

/// Rebuild `timestamp` (UTC) from the first time-bearing column and derive the
/// calendar fields. Returns `None` when the record has no time column,
/// otherwise the number of values that could not be read as a time.
pub fn normalize_time(records: &mut RecordSet, tz: Tz) -> Option<usize> {
    let primary = TIME_SOURCES.iter().copied().find(|c| records.has_column(c))?;
    let mut failures = 0;
    let timestamps: Vec<Value> = records
        .column(primary)
        .unwrap_or_default()
        .into_iter()
        .map(|v| {
            if v.is_null() {
                return Value::Null;
            }
            match to_timestamp(v, tz) {
                Some(ts) => Value::Timestamp(ts),
                None => {
                    failures += 1;
                    Value::Null
                }
            }
        })
        .collect();

    records.set_column("timestamp", timestamps);
    if primary == "datetime" {
        records.drop_column("datetime");
    }
    derive_calendar(records);
    Some(failures)
}

/// (Re)derive the calendar columns from `timestamp`.
pub fn derive_calendar(records: &mut RecordSet) {
    let stamps: Vec<Option<DateTime<Utc>>> = match records.column("timestamp") {
        Some(col) => col.into_iter().map(Value::as_timestamp).collect(),
        None => return,
    };

    let derive = |f: &dyn Fn(&DateTime<Utc>) -> Value| -> Vec<Value> {
        stamps
            .iter()
            .map(|ts| ts.as_ref().map(f).unwrap_or(Value::Null))
            .collect()
    };

    let date = derive(&|ts| Value::Date(ts.date_naive()));
    let year = derive(&|ts| Value::Int(ts.year() as i64));
    let month = derive(&|ts| Value::Int(ts.month() as i64));
    let day = derive(&|ts| Value::Int(ts.day() as i64));
    let hour = derive(&|ts| Value::Int(ts.hour() as i64));
    let minute = derive(&|ts| Value::Int(ts.minute() as i64));
    let day_of_week = derive(&|ts| Value::Int(ts.weekday().num_days_from_monday() as i64));
    let day_of_year = derive(&|ts| Value::Int(ts.ordinal() as i64));
    let week_of_year = derive(&|ts| Value::Int(ts.iso_week().week() as i64));

    records.set_column("date", date);
    records.set_column("year", year);
    records.set_column("month", month);
    records.set_column("day", day);
    records.set_column("hour", hour);
    records.set_column("minute", minute);
    records.set_column("day_of_week", day_of_week);
    records.set_column("day_of_year", day_of_year);
    records.set_column("week_of_year", week_of_year);
}
