//! Individual checks, in the order the Validator runs them.

use super::schema::Schema;
use super::{read_timestamp, RowRule, ValidationLevel, ValidationResult};
use crate::domain::{DataType, RecordSet};
use crate::pipeline::processing::standardize::granularity::group_rows;
use crate::pipeline::processing::stats;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

fn present<'a>(records: &RecordSet, columns: &'a [&'a str]) -> impl Iterator<Item = &'a str> + 'a {
    let has: Vec<bool> = columns.iter().map(|c| records.has_column(c)).collect();
    columns
        .iter()
        .zip(has)
        .filter(|(_, has)| *has)
        .map(|(c, _)| *c)
}

fn numeric_values(records: &RecordSet, column: &str) -> Vec<Option<f64>> {
    records
        .column(column)
        .map(|col| {
            col.into_iter()
                .map(|v| v.as_f64().filter(|x| !x.is_nan()))
                .collect()
        })
        .unwrap_or_default()
}

pub(super) fn required_columns(
    records: &RecordSet,
    schema: &Schema,
    data_type: &DataType,
    sink: &mut impl FnMut(ValidationResult),
) {
    let missing: Vec<&str> = schema
        .required_columns
        .iter()
        .copied()
        .filter(|c| !records.has_column(c))
        .collect();

    let result = if missing.is_empty() {
        ValidationResult::new(
            "required_columns",
            ValidationLevel::Info,
            true,
            "All required columns present",
        )
    } else {
        ValidationResult::new(
            "required_columns",
            ValidationLevel::Error,
            false,
            format!("Missing required columns: {:?}", missing),
        )
        .with_detail("missing_columns", missing)
    };
    sink(result
        .with_detail("data_type", data_type.as_str())
        .with_detail("required_columns", schema.required_columns.to_vec()));
}

pub(super) fn missing_values(
    records: &RecordSet,
    schema: &Schema,
    threshold: f64,
    sink: &mut impl FnMut(ValidationResult),
) {
    for column in present(records, schema.numeric_columns) {
        let missing = records
            .column(column)
            .map(|col| col.iter().filter(|v| v.is_null()).count())
            .unwrap_or(0);
        if missing == 0 {
            continue;
        }
        let ratio = missing as f64 / records.len() as f64;
        let within = ratio <= threshold;
        let level = if within {
            ValidationLevel::Warning
        } else {
            ValidationLevel::Error
        };
        sink(
            ValidationResult::new(
                format!("missing_values_{}", column),
                level,
                within,
                format!(
                    "Column {} has {} missing values ({:.1}%)",
                    column,
                    missing,
                    ratio * 100.0
                ),
            )
            .with_detail("column", column)
            .with_detail("missing_count", missing)
            .with_detail("missing_percentage", ratio)
            .with_detail("threshold", threshold),
        );
    }
}

pub(super) fn data_types(
    records: &RecordSet,
    schema: &Schema,
    sink: &mut impl FnMut(ValidationResult),
) {
    for column in present(records, schema.numeric_columns) {
        let non_numeric = records
            .column(column)
            .map(|col| {
                col.iter()
                    .filter(|v| !v.is_null() && !v.is_numeric())
                    .count()
            })
            .unwrap_or(0);
        if non_numeric > 0 {
            sink(
                ValidationResult::new(
                    format!("data_type_{}", column),
                    ValidationLevel::Error,
                    false,
                    format!("Column {} has {} non-numeric values", column, non_numeric),
                )
                .with_detail("column", column)
                .with_detail("non_numeric_count", non_numeric)
                .with_detail("expected_type", "numeric"),
            );
        }
    }
}

pub(super) fn ranges(records: &RecordSet, schema: &Schema, sink: &mut impl FnMut(ValidationResult)) {
    for range in schema.ranges {
        if !records.has_column(range.column) {
            continue;
        }
        let values = numeric_values(records, range.column);

        if let Some(min) = range.min {
            let below = values.iter().flatten().filter(|v| **v < min).count();
            if below > 0 {
                sink(
                    ValidationResult::new(
                        format!("range_min_{}", range.column),
                        ValidationLevel::Error,
                        false,
                        format!(
                            "Column {} has {} values below minimum {}",
                            range.column, below, min
                        ),
                    )
                    .with_detail("column", range.column)
                    .with_detail("below_min_count", below)
                    .with_detail("minimum", min)
                    .with_row_rule(RowRule::Min {
                        column: range.column.to_string(),
                        bound: min,
                    }),
                );
            }
        }

        if let Some(max) = range.max {
            let above = values.iter().flatten().filter(|v| **v > max).count();
            if above > 0 {
                sink(
                    ValidationResult::new(
                        format!("range_max_{}", range.column),
                        ValidationLevel::Error,
                        false,
                        format!(
                            "Column {} has {} values above maximum {}",
                            range.column, above, max
                        ),
                    )
                    .with_detail("column", range.column)
                    .with_detail("above_max_count", above)
                    .with_detail("maximum", max)
                    .with_row_rule(RowRule::Max {
                        column: range.column.to_string(),
                        bound: max,
                    }),
                );
            }
        }
    }
}

pub(super) fn positivity(
    records: &RecordSet,
    schema: &Schema,
    sink: &mut impl FnMut(ValidationResult),
) {
    for column in present(records, schema.positive_columns) {
        let negative = numeric_values(records, column)
            .into_iter()
            .flatten()
            .filter(|v| *v < 0.0)
            .count();
        if negative > 0 {
            sink(
                ValidationResult::new(
                    format!("positive_values_{}", column),
                    ValidationLevel::Error,
                    false,
                    format!("Column {} has {} negative values", column, negative),
                )
                .with_detail("column", column)
                .with_detail("negative_count", negative)
                .with_row_rule(RowRule::NonNegative {
                    column: column.to_string(),
                }),
            );
        }
    }
}

pub(super) fn consistency(
    records: &RecordSet,
    schema: &Schema,
    sink: &mut impl FnMut(ValidationResult),
) {
    for rule in schema.consistency {
        if !records.has_column(rule.left) || !records.has_column(rule.right) {
            continue;
        }
        let left = numeric_values(records, rule.left);
        let right = numeric_values(records, rule.right);
        let violations = left
            .iter()
            .zip(&right)
            .filter(|(l, r)| match (l, r) {
                (Some(l), Some(r)) => rule.op.violated(*l, *r),
                _ => false,
            })
            .count();
        if violations > 0 {
            sink(
                ValidationResult::new(
                    rule.check_name(),
                    ValidationLevel::Error,
                    false,
                    format!("{}: {} violations found", rule.description, violations),
                )
                .with_detail("condition", rule.condition())
                .with_detail("description", rule.description)
                .with_detail("violation_count", violations)
                .with_detail("columns", vec![rule.left, rule.right]),
            );
        }
    }
}

pub(super) fn timestamps(
    records: &RecordSet,
    data_type: &DataType,
    now: DateTime<Utc>,
    future_tolerance: Duration,
    sink: &mut impl FnMut(ValidationResult),
) {
    let Some(ts_idx) = records.column_index("timestamp") else {
        return;
    };
    let stamps: Vec<Option<DateTime<Utc>>> = records
        .rows()
        .iter()
        .map(|row| read_timestamp(&row[ts_idx]))
        .collect();

    let nulls = stamps.iter().filter(|t| t.is_none()).count();
    if nulls > 0 {
        sink(
            ValidationResult::new(
                "null_timestamps",
                ValidationLevel::Error,
                false,
                format!("Found {} null timestamps", nulls),
            )
            .with_detail("null_count", nulls)
            .with_row_rule(RowRule::NonNullTimestamp),
        );
    }

    let horizon = now + future_tolerance;
    let future = stamps.iter().flatten().filter(|t| **t > horizon).count();
    if future > 0 {
        sink(
            ValidationResult::new(
                "future_timestamps",
                ValidationLevel::Warning,
                true,
                format!("Found {} timestamps in the future", future),
            )
            .with_detail("future_count", future),
        );
    }

    // Order is judged within each series so interleaved symbols are not flagged.
    let mut backwards = 0;
    for group in group_rows(records, &data_type.identifier_columns()) {
        let series: Vec<DateTime<Utc>> = group.iter().filter_map(|&r| stamps[r]).collect();
        backwards += series.windows(2).filter(|w| w[1] < w[0]).count();
    }
    if backwards > 0 {
        sink(
            ValidationResult::new(
                "chronological_order",
                ValidationLevel::Warning,
                true,
                format!("Found {} non-chronological timestamps", backwards),
            )
            .with_detail("non_chronological_count", backwards),
        );
    }
}

pub(super) fn anomalies(
    records: &RecordSet,
    schema: &Schema,
    threshold: f64,
    sink: &mut impl FnMut(ValidationResult),
) {
    for column in present(records, schema.numeric_columns) {
        let values: Vec<f64> = numeric_values(records, column).into_iter().flatten().collect();
        if values.len() <= 2 {
            continue;
        }
        let (Some(mean), Some(std)) = (stats::mean(&values), stats::sample_std(&values)) else {
            continue;
        };
        if std <= 0.0 {
            continue;
        }
        let count = values
            .iter()
            .filter(|v| ((**v - mean) / std).abs() > threshold)
            .count();
        if count > 0 {
            sink(
                ValidationResult::new(
                    format!("anomalies_{}", column),
                    ValidationLevel::Warning,
                    true,
                    format!(
                        "Found {} anomalies in column {} (z-score > {})",
                        count, column, threshold
                    ),
                )
                .with_detail("column", column)
                .with_detail("anomaly_count", count)
                .with_detail("z_score_threshold", threshold)
                .with_detail("mean", mean)
                .with_detail("std", std),
            );
        }
    }
}

pub(super) fn uniqueness(
    records: &RecordSet,
    data_type: &DataType,
    sink: &mut impl FnMut(ValidationResult),
) {
    let key: Vec<&str> = present(records, data_type.natural_key()).collect();
    let key_idx: Vec<usize> = key.iter().filter_map(|c| records.column_index(c)).collect();
    if key_idx.is_empty() {
        return;
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    let keys: Vec<String> = (0..records.len())
        .map(|row| records.row_key(row, &key_idx))
        .collect();
    for k in &keys {
        *counts.entry(k.clone()).or_default() += 1;
    }
    let duplicates = keys.iter().filter(|k| counts[*k] > 1).count();
    if duplicates > 0 {
        sink(
            ValidationResult::new(
                "duplicate_records",
                ValidationLevel::Error,
                false,
                format!("Found {} duplicate records based on {:?}", duplicates, key),
            )
            .with_detail("duplicate_count", duplicates)
            .with_detail("unique_constraint_columns", key),
        );
    }
}

pub(super) fn completeness(
    records: &RecordSet,
    data_type: &DataType,
    sink: &mut impl FnMut(ValidationResult),
) {
    let Some(ts_idx) = records.column_index("timestamp") else {
        return;
    };
    if records.len() < 2 {
        return;
    }

    let mut deltas: Vec<i64> = Vec::new();
    for group in group_rows(records, &data_type.identifier_columns()) {
        let mut series: Vec<DateTime<Utc>> = group
            .iter()
            .filter_map(|&r| read_timestamp(&records.rows()[r][ts_idx]))
            .collect();
        series.sort();
        deltas.extend(series.windows(2).map(|w| (w[1] - w[0]).num_seconds()));
    }
    let as_f64: Vec<f64> = deltas.iter().map(|d| *d as f64).collect();
    let Some(median) = stats::median(&as_f64) else {
        return;
    };
    if median <= 0.0 {
        return;
    }

    let gaps: Vec<i64> = deltas
        .into_iter()
        .filter(|d| *d as f64 > 2.0 * median)
        .collect();
    if gaps.is_empty() {
        return;
    }
    let total: i64 = gaps.iter().sum();
    let largest = gaps.iter().copied().max().unwrap_or_default();
    sink(
        ValidationResult::new(
            "time_gaps",
            ValidationLevel::Warning,
            true,
            format!("Found {} gaps in time series data", gaps.len()),
        )
        .with_detail("gap_count", gaps.len())
        .with_detail("total_gap_duration", format_secs(total))
        .with_detail("median_interval", format_secs(median as i64))
        .with_detail("largest_gap", format_secs(largest)),
    );
}

/// `1d 02:30:00` style rendering of a second count.
fn format_secs(secs: i64) -> String {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (h, m, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);
    if days > 0 {
        format!("{}d {:02}:{:02}:{:02}", days, h, m, s)
    } else {
        format!("{:02}:{:02}:{:02}", h, m, s)
    }
}
