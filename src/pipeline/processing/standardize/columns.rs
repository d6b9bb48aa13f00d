//! Column-name canonicalization and the per-field semantic types.

use crate::domain::{DataType, RecordSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-./]+").expect("static regex"));
static NON_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]").expect("static regex"));
static REPEATED_UNDERSCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").expect("static regex"));

/// Canonical name → accepted spellings, in priority order. Each canonical
/// name is its own first alias so canonical input maps onto itself.
static COLUMN_ALIASES: &[(&str, &[&str])] = &[
    ("timestamp", &["timestamp", "time", "datetime", "date_time", "observation_time"]),
    ("date", &["date", "trade_date", "transaction_date", "observation_date"]),
    ("open", &["open", "open_price", "opening_price", "1_open"]),
    ("high", &["high", "high_price", "highest_price", "2_high"]),
    ("low", &["low", "low_price", "lowest_price", "3_low"]),
    ("close", &["close", "close_price", "closing_price", "price", "4_close"]),
    ("volume", &["volume", "trade_volume", "vol", "5_volume"]),
    ("adj_close", &["adj_close", "adjusted_close", "adj_close_price"]),
    ("dividend", &["dividend", "dividend_amount"]),
    ("split", &["split", "split_ratio", "split_coefficient"]),
    ("symbol", &["symbol", "ticker", "instrument", "pair"]),
    ("exchange", &["exchange", "venue", "market"]),
    ("currency", &["currency", "ccy"]),
    ("series_id", &["series_id", "series_code", "indicator_id"]),
    ("value", &["value", "observation", "measure"]),
    ("units", &["units", "unit"]),
    ("location", &["location", "city", "station"]),
    ("temperature", &["temperature", "temp"]),
    ("humidity", &["humidity", "relative_humidity"]),
    ("pressure", &["pressure", "air_pressure"]),
    ("wind_speed", &["wind_speed", "wind_velocity"]),
    ("entity", &["entity", "subject"]),
    ("sentiment_score", &["sentiment_score", "sentiment", "polarity"]),
    ("confidence", &["confidence", "confidence_score"]),
];

/// Semantic type a canonical field is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldType {
    Timestamp,
    /// Date when the input has no time of day, timestamp otherwise.
    DateLike,
    Float,
    /// Nullable integer; non-integral numbers stay float.
    Int,
    Text,
}

pub fn field_type(column: &str) -> Option<FieldType> {
    let ty = match column {
        "timestamp" => FieldType::Timestamp,
        "date" => FieldType::DateLike,
        "open" | "high" | "low" | "close" | "adj_close" | "dividend" | "split" | "value"
        | "temperature" | "humidity" | "pressure" | "wind_speed" | "sentiment_score"
        | "confidence" => FieldType::Float,
        "volume" => FieldType::Int,
        "symbol" | "exchange" | "currency" | "series_id" | "units" | "location" | "entity"
        | "source" => FieldType::Text,
        _ => return None,
    };
    Some(ty)
}

/// Columns a canonical record of this type always carries.
pub fn required_columns(data_type: &DataType) -> &'static [&'static str] {
    match data_type {
        DataType::Stock => &["timestamp", "symbol", "open", "high", "low", "close", "volume"],
        DataType::Crypto => &[
            "timestamp", "symbol", "open", "high", "low", "close", "volume", "exchange",
        ],
        DataType::Forex => &["timestamp", "symbol", "open", "high", "low", "close"],
        DataType::Economic => &["timestamp", "series_id", "value"],
        DataType::Weather => &[
            "timestamp", "location", "temperature", "humidity", "pressure", "wind_speed",
        ],
        DataType::Sentiment => &["timestamp", "entity", "sentiment_score", "confidence"],
        DataType::Other(_) => &[],
    }
}

/// Name given to a header with no usable characters.
const UNNAMED_COLUMN: &str = "column";

/// Lower-case, separators to `_`, anything else non-alphanumeric dropped.
pub fn normalize_column_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let separated = SEPARATORS.replace_all(&lower, "_");
    let stripped = NON_IDENT.replace_all(&separated, "");
    let collapsed = REPEATED_UNDERSCORE.replace_all(&stripped, "_");
    let result = collapsed.trim_matches('_');
    if result.is_empty() {
        UNNAMED_COLUMN.to_string()
    } else {
        result.to_string()
    }
}

/// Unaliased names must be plain identifiers, so a leading digit gets a prefix.
fn passthrough_name(normalized: &str) -> String {
    if normalized.starts_with(|c: char| c.is_ascii_digit()) {
        format!("col_{}", normalized)
    } else {
        normalized.to_string()
    }
}

/// Rename every column to its canonical name. Aliases are tried in table
/// order; a raw column is claimed at most once and a canonical name is
/// assigned at most once. Clashing leftovers get a numeric suffix.
pub fn canonicalize(records: &RecordSet) -> RecordSet {
    let normalized: Vec<String> = records
        .columns()
        .iter()
        .map(|c| normalize_column_name(c))
        .collect();
    let mut assigned: Vec<Option<String>> = vec![None; normalized.len()];

    for (canonical, aliases) in COLUMN_ALIASES {
        'aliases: for alias in aliases.iter() {
            for (idx, name) in normalized.iter().enumerate() {
                if assigned[idx].is_none() && name == alias {
                    assigned[idx] = Some((*canonical).to_string());
                    break 'aliases;
                }
            }
        }
    }

    let mut used: HashSet<String> = assigned.iter().flatten().cloned().collect();
    let mut columns = Vec::with_capacity(normalized.len());
    for (idx, name) in normalized.into_iter().enumerate() {
        let final_name = match assigned[idx].take() {
            Some(canonical) => canonical,
            None => {
                let base = passthrough_name(&name);
                let mut candidate = base.clone();
                let mut n = 1;
                while used.contains(&candidate) {
                    candidate = format!("{}_{}", base, n);
                    n += 1;
                }
                used.insert(candidate.clone());
                candidate
            }
        };
        columns.push(final_name);
    }

    RecordSet::from_rows(columns, records.rows().to_vec())
}
