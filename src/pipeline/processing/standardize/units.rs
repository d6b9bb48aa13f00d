use crate::domain::{RecordSet, Value};
use std::collections::HashMap;

/// Price-like columns converted when a batch carries a `currency` column.
const PRICE_COLUMNS: &[&str] = &["open", "high", "low", "close", "adj_close", "dividend", "value"];

/// Units per one US dollar.
pub fn default_currency_rates() -> HashMap<String, f64> {
    [
        ("USD", 1.0),
        ("EUR", 0.85),
        ("GBP", 0.73),
        ("JPY", 110.0),
        ("CAD", 1.25),
        ("AUD", 1.35),
        ("CHF", 0.92),
        ("CNY", 6.45),
        ("INR", 75.0),
    ]
    .into_iter()
    .map(|(code, rate)| (code.to_string(), rate))
    .collect()
}

/// Currencies seen in the batch that have no rate, with their row counts.
pub type UnknownCurrencies = Vec<(String, usize)>;

/// Convert price columns into `target` and overwrite `currency` with it.
/// Rows in an unknown currency keep their values.
pub fn normalize_currency(
    records: &mut RecordSet,
    rates: &HashMap<String, f64>,
    target: &str,
) -> UnknownCurrencies {
    let Some(currencies) = records.column("currency").map(|col| {
        col.into_iter()
            .map(|v| v.as_str().map(|s| s.trim().to_uppercase()))
            .collect::<Vec<_>>()
    }) else {
        return Vec::new();
    };

    let target = target.to_uppercase();
    let target_rate = rates.get(&target).copied();
    let mut unknown: HashMap<String, usize> = HashMap::new();

    let factors: Vec<Option<f64>> = currencies
        .iter()
        .map(|cur| {
            let cur = cur.as_deref()?;
            if cur == target {
                return None;
            }
            match (rates.get(cur), target_rate) {
                (Some(rate), Some(target_rate)) if *rate > 0.0 => Some(target_rate / rate),
                _ => {
                    *unknown.entry(cur.to_string()).or_default() += 1;
                    None
                }
            }
        })
        .collect();

    for column in PRICE_COLUMNS {
        let mut row = 0;
        records.map_column(column, |v| {
            let factor = factors.get(row).copied().flatten();
            row += 1;
            match (factor, v.as_f64()) {
                (Some(factor), Some(x)) => Value::Float(x * factor),
                _ => v.clone(),
            }
        });
    }

    records.map_column("currency", |_| Value::Text(target.clone()));

    let mut unknown: UnknownCurrencies = unknown.into_iter().collect();
    unknown.sort();
    unknown
}

/// Imperial rows (explicit `units` marker) become metric: Fahrenheit to
/// Celsius, mph to m/s. Returns the number of rows converted.
pub fn normalize_weather_units(records: &mut RecordSet) -> usize {
    let Some(imperial) = records.column("units").map(|col| {
        col.into_iter()
            .map(|v| v.as_str().is_some_and(|s| s.trim().eq_ignore_ascii_case("imperial")))
            .collect::<Vec<bool>>()
    }) else {
        return 0;
    };

    let convert = |records: &mut RecordSet, column: &str, f: fn(f64) -> f64| {
        let mut row = 0;
        records.map_column(column, |v| {
            let is_imperial = imperial.get(row).copied().unwrap_or(false);
            row += 1;
            match v.as_f64() {
                Some(x) if is_imperial => Value::Float(f(x)),
                _ => v.clone(),
            }
        });
    };
    convert(records, "temperature", |f| (f - 32.0) * 5.0 / 9.0);
    convert(records, "wind_speed", |mph| mph * 0.44704);

    let converted = imperial.iter().filter(|b| **b).count();
    let mut row = 0;
    records.map_column("units", |v| {
        let is_imperial = imperial.get(row).copied().unwrap_or(false);
        row += 1;
        if is_imperial {
            Value::from("metric")
        } else {
            v.clone()
        }
    });
    converted
}

/// Map economic unit spellings onto one vocabulary.
pub fn normalize_economic_units(records: &mut RecordSet) {
    records.map_column("units", |v| match v.as_str() {
        Some(s) => {
            let lower = s.trim().to_lowercase();
            let mapped = match lower.as_str() {
                "percent" | "pct" | "%" => "percentage",
                "us dollars" | "dollars" | "$" => "usd",
                "euros" => "eur",
                "pounds" => "gbp",
                "yens" => "jpy",
                other => other,
            };
            Value::from(mapped)
        }
        None => v.clone(),
    });
}
