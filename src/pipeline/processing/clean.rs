//! Optional cleaning pass run between standardization and validation.
//!
//! Rows that repeat another row in everything but their time columns are
//! dropped (first one wins). Columns with a small share of nulls are imputed:
//! numeric columns with their median, text columns with their most frequent
//! value, time columns with the previous value. Columns missing more than the
//! threshold are left as they are and reported.

use crate::constants;
use crate::domain::{RecordSet, Value};
use crate::observability::metrics;
use crate::pipeline::processing::stats;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Columns ignored when looking for repeated rows.
const DEDUPE_IGNORED: &[&str] = &["timestamp", "date", "created_at"];

#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// Largest null ratio a column may have and still be imputed
    pub missing_value_threshold: f64,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            missing_value_threshold: constants::DEFAULT_MISSING_VALUE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    Median,
    Mode,
    ForwardFill,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnFill {
    pub column: String,
    pub strategy: FillStrategy,
    pub filled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleaningReport {
    pub duplicates_removed: usize,
    pub filled: Vec<ColumnFill>,
    /// Columns above the missing-value threshold; not imputed
    pub sparse_columns: Vec<String>,
}

impl CleaningReport {
    pub fn fill_for(&self, column: &str) -> Option<&ColumnFill> {
        self.filled.iter().find(|f| f.column == column)
    }
}

#[derive(Debug, Clone)]
pub struct Cleaned {
    pub records: RecordSet,
    pub report: CleaningReport,
}

#[derive(Debug, Clone, Default)]
pub struct Cleaner {
    config: CleanerConfig,
}

impl Cleaner {
    pub fn new(config: CleanerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CleanerConfig {
        &self.config
    }

    /// Never mutates `records`.
    pub fn clean(&self, records: &RecordSet) -> Cleaned {
        let mut report = CleaningReport::default();
        let mut cleaned = remove_duplicates(records, &mut report);
        if !cleaned.is_empty() {
            fill_missing(&mut cleaned, self.config.missing_value_threshold, &mut report);
        }

        info!(
            original_rows = records.len(),
            cleaned_rows = cleaned.len(),
            duplicates_removed = report.duplicates_removed,
            columns_filled = report.filled.len(),
            "Data cleaning completed"
        );
        Cleaned {
            records: cleaned,
            report,
        }
    }
}

fn remove_duplicates(records: &RecordSet, report: &mut CleaningReport) -> RecordSet {
    let key_idx: Vec<usize> = records
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| !DEDUPE_IGNORED.contains(&c.as_str()))
        .map(|(i, _)| i)
        .collect();
    if key_idx.is_empty() {
        return records.clone();
    }

    let mut seen = HashSet::new();
    let keep: Vec<bool> = (0..records.len())
        .map(|row| seen.insert(records.row_key(row, &key_idx)))
        .collect();
    let mut deduped = records.clone();
    deduped.retain_rows(&keep);

    let removed = records.len() - deduped.len();
    if removed > 0 {
        warn!(duplicates_removed = removed, "Removed duplicate rows");
        metrics::clean::duplicates_removed(removed);
    }
    report.duplicates_removed = removed;
    deduped
}

enum Fill {
    Constant(FillStrategy, Value),
    Forward,
}

fn fill_missing(records: &mut RecordSet, threshold: f64, report: &mut CleaningReport) {
    let total = records.len() as f64;
    let columns = records.columns().to_vec();

    for column in &columns {
        let (missing, plan) = {
            let Some(values) = records.column(column) else {
                continue;
            };
            let missing = values.iter().filter(|v| v.is_null()).count();
            if missing == 0 {
                continue;
            }
            let ratio = missing as f64 / total;
            if ratio > threshold {
                warn!(
                    column = %column,
                    missing_percentage = ratio,
                    threshold,
                    "High missing values in column; not imputing"
                );
                report.sparse_columns.push(column.clone());
                continue;
            }
            (missing, plan_fill(&values))
        };
        let Some(plan) = plan else {
            debug!(column = %column, "Mixed column; not imputing");
            continue;
        };

        let strategy = match plan {
            Fill::Constant(strategy, fill) => {
                records.map_column(column, |v| if v.is_null() { fill.clone() } else { v.clone() });
                strategy
            }
            Fill::Forward => {
                let mut last: Option<Value> = None;
                records.map_column(column, |v| {
                    if v.is_null() {
                        last.clone().unwrap_or(Value::Null)
                    } else {
                        last = Some(v.clone());
                        v.clone()
                    }
                });
                FillStrategy::ForwardFill
            }
        };

        let still_missing = records
            .column(column)
            .map_or(0, |c| c.iter().filter(|v| v.is_null()).count());
        let filled = missing - still_missing;
        if filled > 0 {
            metrics::clean::values_filled(column, filled);
            report.filled.push(ColumnFill {
                column: column.clone(),
                strategy,
                filled,
            });
        }
    }
}

/// How to fill a column, judged from its non-null values; `None` when they
/// are of mixed kinds.
fn plan_fill(values: &[&Value]) -> Option<Fill> {
    let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();

    if present.iter().all(|v| v.is_numeric()) {
        let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
        let median = stats::median(&numbers)?;
        let all_int = present.iter().all(|v| matches!(v, Value::Int(_)));
        let fill = if all_int && median.fract() == 0.0 {
            Value::Int(median as i64)
        } else {
            Value::Float(median)
        };
        return Some(Fill::Constant(FillStrategy::Median, fill));
    }
    if present
        .iter()
        .all(|v| matches!(v, Value::Timestamp(_) | Value::Date(_)))
    {
        return Some(Fill::Forward);
    }
    if present.iter().all(|v| matches!(v, Value::Text(_) | Value::Bool(_))) {
        return mode(&present).map(|v| Fill::Constant(FillStrategy::Mode, v));
    }
    None
}

/// Most frequent value; ties go to the smallest.
fn mode(values: &[&Value]) -> Option<Value> {
    let mut counts: BTreeMap<String, (usize, &Value)> = BTreeMap::new();
    for value in values {
        counts.entry(value.key_repr()).or_insert((0, *value)).0 += 1;
    }
    let mut best: Option<(usize, &Value)> = None;
    for (count, value) in counts.into_values() {
        if best.map_or(true, |(c, _)| count > c) {
            best = Some((count, value));
        }
    }
    best.map(|(_, v)| v.clone())
}
