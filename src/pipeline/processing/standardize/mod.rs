//! Standardizer: maps provider-shaped records onto the canonical record shape.
//!
//! The steps run in a fixed order and never fail; anything that cannot be
//! interpreted becomes null and is reported as a `StandardizationWarning`.
//! The output is stable under a second pass: standardizing an already
//! canonical record changes nothing but `standardized_at`.

pub mod coerce;
pub mod columns;
pub mod granularity;
pub mod symbols;
pub mod time;
pub mod units;

use crate::constants;
use crate::domain::{DataType, RecordSet, Value};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use columns::FieldType;
use granularity::Granularity;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Columns stamped or carried as metadata; always placed last.
const METADATA_COLUMNS: &[&str] = &["standardized_at", "data_type", "granularity", "units"];

/// Configuration for the standardizer
#[derive(Debug, Clone)]
pub struct StandardizerConfig {
    /// Zone naive timestamps are read in
    pub default_timezone: Tz,
    /// Currency price columns are converted into
    pub default_currency: String,
    /// Units per one US dollar, keyed by ISO code
    pub currency_rates: HashMap<String, f64>,
    /// Appended to crypto symbols that carry no quote currency
    pub crypto_quote_currency: String,
    /// Aggregate data finer than the data type's target interval
    pub resample: bool,
}

impl Default for StandardizerConfig {
    fn default() -> Self {
        Self {
            default_timezone: chrono_tz::UTC,
            default_currency: constants::DEFAULT_CURRENCY.to_string(),
            currency_rates: units::default_currency_rates(),
            crypto_quote_currency: constants::DEFAULT_CRYPTO_QUOTE.to_string(),
            resample: true,
        }
    }
}

/// Non-fatal events recorded while standardizing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StandardizationWarning {
    EmptyInput,
    CoercionFailed {
        column: String,
        target: FieldType,
        count: usize,
    },
    MissingTimeColumn,
    UnknownCurrency {
        currency: String,
        rows: usize,
    },
    UntimedRowsDropped {
        count: usize,
    },
    RequiredColumnBackfilled {
        column: String,
    },
}

impl StandardizationWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            StandardizationWarning::EmptyInput => "empty_input",
            StandardizationWarning::CoercionFailed { .. } => "coercion_failed",
            StandardizationWarning::MissingTimeColumn => "missing_time_column",
            StandardizationWarning::UnknownCurrency { .. } => "unknown_currency",
            StandardizationWarning::UntimedRowsDropped { .. } => "untimed_rows_dropped",
            StandardizationWarning::RequiredColumnBackfilled { .. } => {
                "required_column_backfilled"
            }
        }
    }
}

impl fmt::Display for StandardizationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StandardizationWarning::EmptyInput => write!(f, "input record set is empty"),
            StandardizationWarning::CoercionFailed {
                column,
                target,
                count,
            } => write!(f, "{} value(s) in '{}' could not be read as {:?}", count, column, target),
            StandardizationWarning::MissingTimeColumn => {
                write!(f, "no time column found; timestamp not derived")
            }
            StandardizationWarning::UnknownCurrency { currency, rows } => {
                write!(f, "no rate for currency '{}' ({} rows left unconverted)", currency, rows)
            }
            StandardizationWarning::UntimedRowsDropped { count } => {
                write!(f, "{} row(s) without timestamp dropped while resampling", count)
            }
            StandardizationWarning::RequiredColumnBackfilled { column } => {
                write!(f, "required column '{}' missing; filled with nulls", column)
            }
        }
    }
}

/// Output of one standardization pass.
#[derive(Debug, Clone)]
pub struct Standardized {
    pub records: RecordSet,
    pub warnings: Vec<StandardizationWarning>,
    /// Observed interval after any resampling, when it could be inferred.
    pub granularity: Option<Granularity>,
}

#[derive(Debug, Clone, Default)]
pub struct Standardizer {
    config: StandardizerConfig,
}

impl Standardizer {
    pub fn new(config: StandardizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StandardizerConfig {
        &self.config
    }

    pub fn standardize(&self, raw: &RecordSet, data_type: &DataType) -> Standardized {
        self.standardize_at(raw, data_type, Utc::now())
    }

    /// `standardize` with an explicit `standardized_at` stamp.
    pub fn standardize_at(
        &self,
        raw: &RecordSet,
        data_type: &DataType,
        now: DateTime<Utc>,
    ) -> Standardized {
        let mut warnings = Vec::new();
        let mut records = columns::canonicalize(raw);

        if records.is_empty() {
            warn!(data_type = %data_type, "Standardizing empty record set");
            warnings.push(StandardizationWarning::EmptyInput);
            return Standardized {
                records,
                warnings,
                granularity: None,
            };
        }
        let input_rows = records.len();

        self.coerce_types(&mut records, &mut warnings);

        match time::normalize_time(&mut records, self.config.default_timezone) {
            None => warnings.push(StandardizationWarning::MissingTimeColumn),
            Some(0) => {}
            Some(count) => warnings.push(StandardizationWarning::CoercionFailed {
                column: "timestamp".to_string(),
                target: FieldType::Timestamp,
                count,
            }),
        }

        if records.has_column("symbol") {
            let quote = self.config.crypto_quote_currency.clone();
            records.map_column("symbol", |v| {
                symbols::normalize_symbol_value(v, data_type, &quote)
            });
        }

        self.normalize_units(&mut records, data_type, &mut warnings);

        let granularity = self.normalize_granularity(&mut records, data_type, &mut warnings);

        for column in columns::required_columns(data_type) {
            if !records.has_column(column) {
                records.add_column(column, Value::Null);
                warnings.push(StandardizationWarning::RequiredColumnBackfilled {
                    column: column.to_string(),
                });
                metrics::standardize::backfilled(column);
            }
        }

        self.finalize(&mut records, data_type, now);

        for warning in &warnings {
            warn!(data_type = %data_type, kind = warning.kind(), "{}", warning);
            metrics::standardize::warning(warning.kind());
        }
        metrics::standardize::records(data_type.as_str(), records.len());
        info!(
            data_type = %data_type,
            input_rows,
            output_rows = records.len(),
            warnings = warnings.len(),
            granularity = granularity.map(|g| g.label()).unwrap_or("unknown"),
            "Standardized record set"
        );

        Standardized {
            records,
            warnings,
            granularity,
        }
    }

    fn coerce_types(&self, records: &mut RecordSet, warnings: &mut Vec<StandardizationWarning>) {
        let tz = self.config.default_timezone;
        let typed: Vec<(String, FieldType)> = records
            .columns()
            .iter()
            .filter_map(|c| columns::field_type(c).map(|ty| (c.clone(), ty)))
            .collect();

        for (column, ty) in typed {
            let mut failures = 0;
            records.map_column(&column, |v| match coerce::coerce(v, ty, tz) {
                Some(coerced) => coerced,
                None => {
                    failures += 1;
                    Value::Null
                }
            });
            if failures > 0 {
                metrics::standardize::coercion_failures(&column, failures);
                warnings.push(StandardizationWarning::CoercionFailed {
                    column,
                    target: ty,
                    count: failures,
                });
            }
        }
    }

    fn normalize_units(
        &self,
        records: &mut RecordSet,
        data_type: &DataType,
        warnings: &mut Vec<StandardizationWarning>,
    ) {
        let unknown = units::normalize_currency(
            records,
            &self.config.currency_rates,
            &self.config.default_currency,
        );
        warnings.extend(
            unknown
                .into_iter()
                .map(|(currency, rows)| StandardizationWarning::UnknownCurrency { currency, rows }),
        );

        match data_type {
            DataType::Weather => {
                let converted = units::normalize_weather_units(records);
                if converted > 0 {
                    debug!(rows = converted, "Converted imperial weather rows to metric");
                }
            }
            DataType::Economic => units::normalize_economic_units(records),
            _ => {}
        }
    }

    fn normalize_granularity(
        &self,
        records: &mut RecordSet,
        data_type: &DataType,
        warnings: &mut Vec<StandardizationWarning>,
    ) -> Option<Granularity> {
        let observed = Granularity::classify(granularity::observed_interval(records, data_type)?);
        let target = granularity::target_granularity(data_type);

        let Some(target) = target.filter(|t| self.config.resample && observed < *t) else {
            records.set_column("granularity", vec![Value::from(observed.label()); records.len()]);
            return Some(observed);
        };

        debug!(
            data_type = %data_type,
            observed = observed.label(),
            target = target.label(),
            "Resampling to target granularity"
        );
        let (resampled, dropped) = granularity::resample(records, data_type, target);
        *records = resampled;
        if dropped > 0 {
            warnings.push(StandardizationWarning::UntimedRowsDropped { count: dropped });
        }

        // Label with what the resampled data actually shows so a second pass agrees.
        match granularity::observed_interval(records, data_type) {
            Some(interval) => {
                let after = Granularity::classify(interval);
                records.set_column("granularity", vec![Value::from(after.label()); records.len()]);
                Some(after)
            }
            None => Some(target),
        }
    }

    fn finalize(&self, records: &mut RecordSet, data_type: &DataType, now: DateTime<Utc>) {
        if let Some(ts_idx) = records.column_index("timestamp") {
            let mut order: Vec<usize> = (0..records.len()).collect();
            order.sort_by(|&a, &b| {
                let ta = records.rows()[a][ts_idx].as_timestamp();
                let tb = records.rows()[b][ts_idx].as_timestamp();
                match (ta, tb) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
            *records = records.select_rows(&order);
        }

        let dropped = drop_duplicates_keep_last(records, data_type.natural_key());
        if dropped > 0 {
            debug!(data_type = %data_type, dropped, "Dropped duplicate rows on natural key");
            metrics::standardize::duplicates_dropped(dropped);
        }

        if data_type.is_tradable() && records.has_column("close") && !records.has_column("returns")
        {
            derive_simple_returns(records, data_type);
        }

        records.set_column("standardized_at", vec![Value::Timestamp(now); records.len()]);
        records.set_column("data_type", vec![Value::from(data_type.as_str()); records.len()]);

        let mut order: Vec<String> = time::TIME_FAMILY
            .iter()
            .filter(|c| records.has_column(c))
            .map(|c| c.to_string())
            .collect();
        order.extend(
            records
                .columns()
                .iter()
                .filter(|c| {
                    !time::TIME_FAMILY.contains(&c.as_str())
                        && !METADATA_COLUMNS.contains(&c.as_str())
                })
                .cloned(),
        );
        order.extend(
            METADATA_COLUMNS
                .iter()
                .filter(|c| records.has_column(c))
                .map(|c| c.to_string()),
        );
        records.reorder_columns(&order);
    }
}

/// Keep the last row for each natural key; returns how many were dropped.
fn drop_duplicates_keep_last(records: &mut RecordSet, natural_key: &[&str]) -> usize {
    let key_idx: Vec<usize> = natural_key
        .iter()
        .filter_map(|c| records.column_index(c))
        .collect();
    if key_idx.is_empty() {
        return 0;
    }
    let mut seen: HashSet<String> = HashSet::new();
    let mut keep = vec![false; records.len()];
    for row in (0..records.len()).rev() {
        keep[row] = seen.insert(records.row_key(row, &key_idx));
    }
    let dropped = keep.iter().filter(|k| !**k).count();
    records.retain_rows(&keep);
    dropped
}

/// Close-to-close simple return per series; null when either close is
/// missing or the previous close is zero.
fn derive_simple_returns(records: &mut RecordSet, data_type: &DataType) {
    let Some(close_idx) = records.column_index("close") else {
        return;
    };
    let mut returns = vec![Value::Null; records.len()];
    for group in granularity::group_rows(records, &data_type.identifier_columns()) {
        for pair in group.windows(2) {
            let prev = records.rows()[pair[0]][close_idx].as_f64();
            let curr = records.rows()[pair[1]][close_idx].as_f64();
            if let (Some(prev), Some(curr)) = (prev, curr) {
                if prev != 0.0 {
                    returns[pair[1]] = Value::Float(curr / prev - 1.0);
                }
            }
        }
    }
    records.set_column("returns", returns);
}
