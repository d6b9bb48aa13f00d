//! Quality Gate: validates canonical record sets against per-type schemas.
//!
//! Validation never fails. Every check appends zero or more
//! `ValidationResult`s to a `ValidationSummary`; the caller decides what an
//! invalid summary means. When the summary is invalid the rows implicated by
//! failed ERROR/CRITICAL checks are removed from the returned records.

mod checks;
pub mod report;
pub mod schema;

use crate::constants;
use crate::domain::{DataType, RecordSet, Value};
use crate::observability::metrics;
use crate::pipeline::processing::standardize::coerce::to_timestamp;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

pub use report::ReportFormat;
pub use schema::{schema_for, Schema};

/// Severity of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationLevel {
    /// Informational, never a failure
    Info,
    /// Notable but not fatal
    Warning,
    /// Data-quality failure; implicated rows may be filtered
    Error,
    /// Fatal; the batch is invalid regardless of pass rate
    Critical,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Info => "INFO",
            ValidationLevel::Warning => "WARNING",
            ValidationLevel::Error => "ERROR",
            ValidationLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row predicate a failed check implies; used to filter invalid batches.
#[derive(Debug, Clone, PartialEq)]
pub enum RowRule {
    /// Numeric value must be >= bound
    Min { column: String, bound: f64 },
    /// Numeric value must be <= bound
    Max { column: String, bound: f64 },
    /// Numeric value must be >= 0
    NonNegative { column: String },
    /// `timestamp` must be present
    NonNullTimestamp,
}

impl RowRule {
    /// True when the row breaks the rule. Nulls only break `NonNullTimestamp`.
    pub fn violated_by(&self, records: &RecordSet, row: usize) -> bool {
        let numeric = |column: &str| records.get(row, column).and_then(Value::as_f64);
        match self {
            RowRule::Min { column, bound } => numeric(column).is_some_and(|v| v < *bound),
            RowRule::Max { column, bound } => numeric(column).is_some_and(|v| v > *bound),
            RowRule::NonNegative { column } => numeric(column).is_some_and(|v| v < 0.0),
            RowRule::NonNullTimestamp => records
                .get(row, "timestamp")
                .is_some_and(|v| read_timestamp(v).is_none()),
        }
    }
}

/// A `timestamp` cell as a UTC instant. Un-standardized text and epoch values
/// are parsed the way the standardizer reads them, naive times as UTC.
fn read_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if value.is_null() {
        return None;
    }
    to_timestamp(value, chrono_tz::Tz::UTC)
}

/// Outcome of one named check. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    check_name: String,
    level: ValidationLevel,
    message: String,
    passed: bool,
    details: serde_json::Map<String, serde_json::Value>,
    timestamp: DateTime<Utc>,
    #[serde(skip)]
    row_rule: Option<RowRule>,
}

impl ValidationResult {
    pub fn new(
        check_name: impl Into<String>,
        level: ValidationLevel,
        passed: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            level,
            message: message.into(),
            passed,
            details: serde_json::Map::new(),
            timestamp: Utc::now(),
            row_rule: None,
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub(crate) fn with_row_rule(mut self, rule: RowRule) -> Self {
        self.row_rule = Some(rule);
        self
    }

    pub fn check_name(&self) -> &str {
        &self.check_name
    }

    pub fn level(&self) -> ValidationLevel {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn details(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.details
    }

    pub fn detail(&self, key: &str) -> Option<&serde_json::Value> {
        self.details.get(key)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn row_rule(&self) -> Option<&RowRule> {
        self.row_rule.as_ref()
    }
}

/// Ordered results plus running counters.
///
/// Counters are only touched by `add`, so `passed + failed == total` holds
/// for every reachable state, and `is_valid` is derived on each call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationSummary {
    results: Vec<ValidationResult>,
    total: usize,
    passed: usize,
    failed: usize,
    by_level: BTreeMap<ValidationLevel, usize>,
}

impl ValidationSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: ValidationResult) {
        self.total += 1;
        if result.passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        *self.by_level.entry(result.level).or_default() += 1;
        self.results.push(result);
    }

    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn passed(&self) -> usize {
        self.passed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Number of results at `level`, passed or not.
    pub fn count(&self, level: ValidationLevel) -> usize {
        self.by_level.get(&level).copied().unwrap_or(0)
    }

    /// Number of failed results at `level`.
    pub fn failed_at(&self, level: ValidationLevel) -> usize {
        self.results
            .iter()
            .filter(|r| !r.passed && r.level == level)
            .count()
    }

    /// 1.0 for an empty summary.
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    pub fn has_critical(&self) -> bool {
        self.count(ValidationLevel::Critical) > 0
    }

    pub fn is_valid(&self, threshold: f64) -> bool {
        if self.total == 0 {
            return true;
        }
        self.pass_rate() >= threshold && !self.has_critical()
    }

    /// First result with the given name.
    pub fn find(&self, check_name: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.check_name == check_name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Thresholds for the Validator
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Largest tolerated null ratio in a numeric column
    pub missing_value_threshold: f64,
    /// |z| above which a value counts as an anomaly
    pub anomaly_zscore_threshold: f64,
    /// Minimum pass rate for `is_valid`
    pub validity_threshold: f64,
    /// How far ahead of now a timestamp may be before it is flagged
    pub future_tolerance: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            missing_value_threshold: constants::DEFAULT_MISSING_VALUE_THRESHOLD,
            anomaly_zscore_threshold: constants::DEFAULT_ANOMALY_ZSCORE_THRESHOLD,
            validity_threshold: constants::DEFAULT_VALIDITY_THRESHOLD,
            future_tolerance: Duration::days(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn is_valid(&self, summary: &ValidationSummary) -> bool {
        summary.is_valid(self.config.validity_threshold)
    }

    pub fn validate(
        &self,
        records: &RecordSet,
        data_type: &DataType,
        level_floor: ValidationLevel,
    ) -> (RecordSet, ValidationSummary) {
        self.validate_at(records, data_type, level_floor, Utc::now())
    }

    /// `validate` with an explicit notion of "now" for the future-timestamp check.
    pub fn validate_at(
        &self,
        records: &RecordSet,
        data_type: &DataType,
        level_floor: ValidationLevel,
        now: DateTime<Utc>,
    ) -> (RecordSet, ValidationSummary) {
        let mut summary = ValidationSummary::new();

        if records.is_empty() {
            summary.add(
                ValidationResult::new(
                    "empty_dataframe",
                    ValidationLevel::Error,
                    false,
                    "Record set is empty",
                )
                .with_detail("data_type", data_type.as_str()),
            );
            self.report(&summary, data_type);
            return (records.clone(), summary);
        }

        info!(
            data_type = %data_type,
            rows = records.len(),
            columns = records.columns().len(),
            "Starting validation"
        );

        let schema = schema_for(data_type);
        if schema.is_none() {
            debug!(data_type = %data_type, "No schema; running structural checks only");
        }

        let mut sink = |r: ValidationResult| summary.add(r);
        if let Some(schema) = schema {
            checks::required_columns(records, schema, data_type, &mut sink);
            checks::missing_values(records, schema, self.config.missing_value_threshold, &mut sink);
            checks::data_types(records, schema, &mut sink);
            checks::ranges(records, schema, &mut sink);
            checks::positivity(records, schema, &mut sink);
            checks::consistency(records, schema, &mut sink);
        }
        checks::timestamps(records, data_type, now, self.config.future_tolerance, &mut sink);
        if let Some(schema) = schema {
            checks::anomalies(records, schema, self.config.anomaly_zscore_threshold, &mut sink);
        }
        checks::uniqueness(records, data_type, &mut sink);
        checks::completeness(records, data_type, &mut sink);

        self.report(&summary, data_type);

        let filtered = if !self.is_valid(&summary) && level_floor > ValidationLevel::Info {
            filter_rows(records, &summary, level_floor.max(ValidationLevel::Error))
        } else {
            records.clone()
        };
        (filtered, summary)
    }

    fn report(&self, summary: &ValidationSummary, data_type: &DataType) {
        for result in summary.failures() {
            warn!(
                data_type = %data_type,
                check = result.check_name(),
                level = %result.level(),
                "{}",
                result.message()
            );
            metrics::quality_gate::check_failed(result.check_name(), result.level().as_str());
        }
        let valid = self.is_valid(summary);
        metrics::quality_gate::batch(data_type.as_str(), valid, summary.pass_rate());
        info!(
            data_type = %data_type,
            total_checks = summary.total(),
            passed_checks = summary.passed(),
            failed_checks = summary.failed(),
            is_valid = valid,
            "Validation completed"
        );
    }
}

/// Drop rows that break the row rule of any failed result at or above `min_level`.
fn filter_rows(
    records: &RecordSet,
    summary: &ValidationSummary,
    min_level: ValidationLevel,
) -> RecordSet {
    let rules: Vec<&RowRule> = summary
        .failures()
        .filter(|r| r.level() >= min_level)
        .filter_map(ValidationResult::row_rule)
        .collect();
    if rules.is_empty() {
        return records.clone();
    }

    let keep: Vec<bool> = (0..records.len())
        .map(|row| !rules.iter().any(|rule| rule.violated_by(records, row)))
        .collect();
    let mut filtered = records.clone();
    filtered.retain_rows(&keep);

    let removed = records.len() - filtered.len();
    if removed > 0 {
        warn!(
            rows_before = records.len(),
            rows_after = filtered.len(),
            rows_removed = removed,
            "Removed rows that failed validation"
        );
        metrics::quality_gate::rows_filtered(removed);
    }
    filtered
}
