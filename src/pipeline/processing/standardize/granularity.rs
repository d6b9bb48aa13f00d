//! Interval inference and OHLC-aware resampling.

use super::time::derive_calendar;
use crate::domain::{DataType, RecordSet, Value};
use crate::pipeline::processing::stats::median;
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Granularity {
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Day1,
    Week1,
    Month1,
    Custom,
}

impl Granularity {
    pub fn label(&self) -> &'static str {
        match self {
            Granularity::Minute1 => "1m",
            Granularity::Minute5 => "5m",
            Granularity::Minute15 => "15m",
            Granularity::Minute30 => "30m",
            Granularity::Hour1 => "1h",
            Granularity::Day1 => "1d",
            Granularity::Week1 => "1w",
            Granularity::Month1 => "1M",
            Granularity::Custom => "custom",
        }
    }

    /// Bucket the median observed interval falls into.
    pub fn classify(interval: Duration) -> Self {
        if interval <= Duration::minutes(1) {
            Granularity::Minute1
        } else if interval <= Duration::minutes(5) {
            Granularity::Minute5
        } else if interval <= Duration::minutes(15) {
            Granularity::Minute15
        } else if interval <= Duration::minutes(30) {
            Granularity::Minute30
        } else if interval <= Duration::hours(1) {
            Granularity::Hour1
        } else if interval <= Duration::days(1) {
            Granularity::Day1
        } else if interval <= Duration::days(7) {
            Granularity::Week1
        } else if interval <= Duration::days(30) {
            Granularity::Month1
        } else {
            Granularity::Custom
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let floor_secs = |width: i64| {
            let secs = ts.timestamp().div_euclid(width) * width;
            Utc.timestamp_opt(secs, 0).single().unwrap_or(ts)
        };
        let at_midnight = |date: chrono::NaiveDate| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
        let date = ts.date_naive();
        match self {
            Granularity::Minute1 => floor_secs(60),
            Granularity::Minute5 => floor_secs(300),
            Granularity::Minute15 => floor_secs(900),
            Granularity::Minute30 => floor_secs(1800),
            Granularity::Hour1 => floor_secs(3600),
            Granularity::Day1 => at_midnight(date),
            Granularity::Week1 => at_midnight(
                date - Duration::days(date.weekday().num_days_from_monday() as i64),
            ),
            Granularity::Month1 => at_midnight(date.with_day(1).unwrap_or(date)),
            Granularity::Custom => ts,
        }
    }
}

/// Interval each data type is stored at.
pub fn target_granularity(data_type: &DataType) -> Option<Granularity> {
    match data_type {
        DataType::Stock | DataType::Economic | DataType::Sentiment => Some(Granularity::Day1),
        DataType::Crypto | DataType::Forex | DataType::Weather => Some(Granularity::Hour1),
        DataType::Other(_) => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    First,
    Last,
    Max,
    Min,
    Sum,
    Mean,
}

impl Aggregation {
    /// Aggregate the non-null values of one bucket, in time order.
    pub fn apply(&self, values: &[&Value]) -> Value {
        let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
        match self {
            Aggregation::First => present.first().map(|v| (*v).clone()).unwrap_or_default(),
            Aggregation::Last => present.last().map(|v| (*v).clone()).unwrap_or_default(),
            Aggregation::Max => extreme(&present, |a, b| a > b),
            Aggregation::Min => extreme(&present, |a, b| a < b),
            Aggregation::Sum => {
                let numbers: Vec<&Value> = present.into_iter().filter(|v| v.is_numeric()).collect();
                if numbers.is_empty() {
                    return Value::Null;
                }
                let ints: Option<Vec<i64>> = numbers
                    .iter()
                    .map(|v| match v {
                        Value::Int(i) => Some(*i),
                        _ => None,
                    })
                    .collect();
                match ints.and_then(|ints| ints.into_iter().try_fold(0i64, i64::checked_add)) {
                    Some(total) => Value::Int(total),
                    None => Value::Float(numbers.iter().filter_map(|v| v.as_f64()).sum()),
                }
            }
            Aggregation::Mean => {
                let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
                crate::pipeline::processing::stats::mean(&numbers)
                    .map(Value::Float)
                    .unwrap_or(Value::Null)
            }
        }
    }
}

fn extreme(values: &[&Value], better: fn(f64, f64) -> bool) -> Value {
    let mut best: Option<(&Value, f64)> = None;
    for v in values {
        if let Some(x) = v.as_f64() {
            if best.map_or(true, |(_, b)| better(x, b)) {
                best = Some((*v, x));
            }
        }
    }
    best.map(|(v, _)| v.clone()).unwrap_or(Value::Null)
}

const TRADABLE_PLAN: &[(&str, Aggregation)] = &[
    ("open", Aggregation::First),
    ("high", Aggregation::Max),
    ("low", Aggregation::Min),
    ("close", Aggregation::Last),
    ("volume", Aggregation::Sum),
    ("adj_close", Aggregation::Last),
    ("symbol", Aggregation::First),
    ("exchange", Aggregation::First),
    ("currency", Aggregation::First),
];

const ECONOMIC_PLAN: &[(&str, Aggregation)] = &[
    ("value", Aggregation::Last),
    ("series_id", Aggregation::First),
    ("units", Aggregation::First),
];

const WEATHER_PLAN: &[(&str, Aggregation)] = &[
    ("temperature", Aggregation::Mean),
    ("humidity", Aggregation::Mean),
    ("pressure", Aggregation::Mean),
    ("wind_speed", Aggregation::Mean),
    ("location", Aggregation::First),
    ("units", Aggregation::First),
];

const SENTIMENT_PLAN: &[(&str, Aggregation)] = &[
    ("sentiment_score", Aggregation::Mean),
    ("confidence", Aggregation::Mean),
    ("entity", Aggregation::First),
    ("source", Aggregation::First),
];

/// How each column of a data type collapses into a bucket. Columns not listed
/// are dropped by resampling.
pub fn aggregation_plan(data_type: &DataType) -> &'static [(&'static str, Aggregation)] {
    match data_type {
        DataType::Stock | DataType::Crypto | DataType::Forex => TRADABLE_PLAN,
        DataType::Economic => ECONOMIC_PLAN,
        DataType::Weather => WEATHER_PLAN,
        DataType::Sentiment => SENTIMENT_PLAN,
        DataType::Other(_) => &[],
    }
}

/// Rows grouped by the identifier columns present, in first-seen order.
pub(crate) fn group_rows(records: &RecordSet, identifier_columns: &[&str]) -> Vec<Vec<usize>> {
    let key_idx: Vec<usize> = identifier_columns
        .iter()
        .filter_map(|c| records.column_index(c))
        .collect();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for row in 0..records.len() {
        let key = records.row_key(row, &key_idx);
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(row);
    }
    groups
}

/// Median of positive consecutive `timestamp` deltas, pooled over series.
pub fn observed_interval(records: &RecordSet, data_type: &DataType) -> Option<Duration> {
    let ts_idx = records.column_index("timestamp")?;
    let mut deltas: Vec<f64> = Vec::new();
    for group in group_rows(records, &data_type.identifier_columns()) {
        let mut stamps: Vec<DateTime<Utc>> = group
            .iter()
            .filter_map(|&r| records.rows()[r][ts_idx].as_timestamp())
            .collect();
        stamps.sort();
        deltas.extend(
            stamps
                .windows(2)
                .map(|w| (w[1] - w[0]).num_milliseconds() as f64)
                .filter(|d| *d > 0.0),
        );
    }
    median(&deltas).map(|ms| Duration::milliseconds(ms.round() as i64))
}

/// Aggregate each series into `target` buckets. Rows without a timestamp
/// cannot be bucketed and are dropped; their count is returned.
pub fn resample(
    records: &RecordSet,
    data_type: &DataType,
    target: Granularity,
) -> (RecordSet, usize) {
    let Some(ts_idx) = records.column_index("timestamp") else {
        return (records.clone(), 0);
    };
    let identifiers: Vec<&str> = data_type
        .identifier_columns()
        .into_iter()
        .filter(|c| records.has_column(c))
        .collect();
    let plan: Vec<(&str, Aggregation, usize)> = aggregation_plan(data_type)
        .iter()
        .filter(|(c, _)| !identifiers.contains(c))
        .filter_map(|(c, agg)| records.column_index(c).map(|idx| (*c, *agg, idx)))
        .collect();
    let key_idx: Vec<usize> = identifiers
        .iter()
        .filter_map(|c| records.column_index(c))
        .collect();

    let mut dropped = 0;
    let mut buckets: BTreeMap<(DateTime<Utc>, String), Vec<usize>> = BTreeMap::new();
    for row in 0..records.len() {
        match records.rows()[row][ts_idx].as_timestamp() {
            Some(ts) => buckets
                .entry((target.bucket_start(ts), records.row_key(row, &key_idx)))
                .or_default()
                .push(row),
            None => dropped += 1,
        }
    }

    let mut columns: Vec<String> = vec!["timestamp".to_string()];
    columns.extend(identifiers.iter().map(|c| c.to_string()));
    columns.extend(plan.iter().map(|(c, _, _)| c.to_string()));
    columns.push("granularity".to_string());

    let mut out = RecordSet::new(columns);
    for ((bucket, _), mut rows) in buckets {
        rows.sort_by_key(|&r| records.rows()[r][ts_idx].as_timestamp());
        let mut row: Vec<Value> = vec![Value::Timestamp(bucket)];
        row.extend(key_idx.iter().map(|&k| records.rows()[rows[0]][k].clone()));
        for (_, agg, idx) in &plan {
            let values: Vec<&Value> = rows.iter().map(|&r| &records.rows()[r][*idx]).collect();
            row.push(agg.apply(&values));
        }
        row.push(Value::from(target.label()));
        out.push_row(row);
    }
    derive_calendar(&mut out);
    (out, dropped)
}
