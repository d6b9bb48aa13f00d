use chrono::{NaiveDate, TimeZone, Utc};
use market_ingest::domain::{DataType, RecordSet, Value};
use market_ingest::pipeline::processing::standardize::granularity::Granularity;
use market_ingest::pipeline::processing::standardize::{
    StandardizationWarning, Standardizer, StandardizerConfig,
};
use serde_json::json;

fn records(rows: serde_json::Value) -> RecordSet {
    RecordSet::from_json_rows(rows.as_array().expect("array literal"))
}

fn f64_at(rs: &RecordSet, row: usize, column: &str) -> f64 {
    rs.get(row, column)
        .and_then(Value::as_f64)
        .unwrap_or_else(|| panic!("{} at row {} is not numeric", column, row))
}

#[test]
fn provider_stock_row_becomes_canonical() {
    let raw = RecordSet::from_rows(
        ["Open", "High", "Low", "Close", "Volume", "Ticker", "Date"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        vec![vec![
            Value::Int(100),
            Value::Int(101),
            Value::Int(99),
            Value::Float(100.5),
            Value::Int(1000),
            Value::from("AAPL.US"),
            Value::from("2024-01-01"),
        ]],
    );

    let out = Standardizer::default().standardize(&raw, &DataType::Stock);
    let rs = &out.records;

    assert_eq!(rs.len(), 1);
    assert_eq!(rs.get(0, "symbol"), Some(&Value::from("AAPL")));
    assert_eq!(rs.get(0, "open"), Some(&Value::Float(100.0)));
    assert_eq!(rs.get(0, "close"), Some(&Value::Float(100.5)));
    assert_eq!(rs.get(0, "volume"), Some(&Value::Int(1000)));
    assert_eq!(
        rs.get(0, "timestamp"),
        Some(&Value::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
    );
    assert_eq!(rs.get(0, "data_type"), Some(&Value::from("stock")));
    assert!(rs.has_column("standardized_at"));
    assert!(out.warnings.is_empty(), "unexpected warnings: {:?}", out.warnings);

    // Time family leads, metadata trails.
    assert_eq!(rs.columns()[0], "timestamp");
    assert_eq!(rs.columns().last().map(String::as_str), Some("data_type"));
}

#[test]
fn missing_required_columns_are_backfilled_with_nulls() {
    let raw = records(json!([
        {"symbol": "MSFT", "date": "2024-03-01", "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5}
    ]));

    let out = Standardizer::default().standardize(&raw, &DataType::Stock);

    assert_eq!(out.records.get(0, "volume"), Some(&Value::Null));
    assert!(out.warnings.contains(&StandardizationWarning::RequiredColumnBackfilled {
        column: "volume".to_string()
    }));
}

#[test]
fn second_pass_changes_nothing() {
    let raw = records(json!([
        {"Ticker": "aapl", "Date": "2024-01-02", "Open": "185.1", "High": 186.0, "Low": 184.2, "Close": 185.6, "Volume": 52000},
        {"Ticker": "aapl", "Date": "2024-01-03", "Open": 184.0, "High": 185.2, "Low": 183.1, "Close": 184.3, "Volume": 48000},
        {"Ticker": "aapl", "Date": "2024-01-04", "Open": 183.0, "High": 184.0, "Low": 181.9, "Close": 182.0, "Volume": 61000}
    ]));
    let now = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap();
    let standardizer = Standardizer::default();

    let first = standardizer.standardize_at(&raw, &DataType::Stock, now);
    let second = standardizer.standardize_at(&first.records, &DataType::Stock, now);

    assert_eq!(first.records, second.records);
    assert_eq!(first.granularity, Some(Granularity::Day1));
    assert_eq!(second.granularity, Some(Granularity::Day1));
    assert!(second.warnings.is_empty());
}

#[test]
fn returns_are_derived_per_symbol() {
    let raw = records(json!([
        {"symbol": "A", "date": "2024-01-02", "open": 1, "high": 1, "low": 1, "close": 10.0, "volume": 1},
        {"symbol": "B", "date": "2024-01-02", "open": 1, "high": 1, "low": 1, "close": 20.0, "volume": 1},
        {"symbol": "A", "date": "2024-01-03", "open": 1, "high": 1, "low": 1, "close": 11.0, "volume": 1},
        {"symbol": "B", "date": "2024-01-03", "open": 1, "high": 1, "low": 1, "close": 19.0, "volume": 1}
    ]));

    let rs = Standardizer::default().standardize(&raw, &DataType::Stock).records;

    for row in 0..rs.len() {
        let day3 = rs.get(row, "date") == Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()));
        let returns = rs.get(row, "returns").cloned().unwrap_or_default();
        if !day3 {
            assert!(returns.is_null());
            continue;
        }
        let expected = match rs.get(row, "symbol").and_then(Value::as_str) {
            Some("A") => 0.1,
            Some("B") => -0.05,
            other => panic!("unexpected symbol {:?}", other),
        };
        assert!((returns.as_f64().unwrap() - expected).abs() < 1e-9);
    }
}

#[test]
fn crypto_and_forex_symbols_are_normalized() {
    let crypto = records(json!([
        {"pair": "btc", "exchange": "binance", "timestamp": "2024-01-01T00:00:00Z", "open": 1, "high": 1, "low": 1, "close": 1, "volume": 1},
        {"pair": "ETH/USD", "exchange": "binance", "timestamp": "2024-01-01T00:00:00Z", "open": 1, "high": 1, "low": 1, "close": 1, "volume": 1}
    ]));
    let rs = Standardizer::default().standardize(&crypto, &DataType::Crypto).records;
    let mut symbols: Vec<&str> = (0..rs.len())
        .filter_map(|r| rs.get(r, "symbol").and_then(Value::as_str))
        .collect();
    symbols.sort();
    assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);

    let forex = records(json!([
        {"symbol": "gbp/jpy", "timestamp": "2024-01-01T00:00:00Z", "open": 1, "high": 1, "low": 1, "close": 1}
    ]));
    let rs = Standardizer::default().standardize(&forex, &DataType::Forex).records;
    assert_eq!(rs.get(0, "symbol"), Some(&Value::from("GBPJPY")));
}

#[test]
fn prices_are_converted_to_the_default_currency() {
    let raw = records(json!([
        {"symbol": "SAP", "date": "2024-01-02", "open": 85.0, "high": 85.0, "low": 85.0, "close": 85.0, "volume": 10, "currency": "eur"},
        {"symbol": "XYZ", "date": "2024-01-02", "open": 5.0, "high": 5.0, "low": 5.0, "close": 5.0, "volume": 10, "currency": "ZZZ"}
    ]));

    let out = Standardizer::default().standardize(&raw, &DataType::Stock);
    let rs = &out.records;
    let sap = (0..rs.len()).find(|&r| rs.get(r, "symbol") == Some(&Value::from("SAP"))).unwrap();
    let xyz = 1 - sap;

    assert!((f64_at(rs, sap, "close") - 100.0).abs() < 1e-9);
    assert!((f64_at(rs, xyz, "close") - 5.0).abs() < 1e-9);
    assert_eq!(rs.get(sap, "currency"), Some(&Value::from("USD")));
    assert_eq!(rs.get(xyz, "currency"), Some(&Value::from("USD")));
    assert!(out.warnings.contains(&StandardizationWarning::UnknownCurrency {
        currency: "ZZZ".to_string(),
        rows: 1
    }));
}

#[test]
fn imperial_weather_rows_become_metric() {
    let raw = records(json!([
        {"city": "Seattle", "timestamp": "2024-06-01T12:00:00Z", "temp": 212.0, "humidity": 40, "pressure": 1012, "wind_speed": 10.0, "units": "imperial"}
    ]));

    let rs = Standardizer::default().standardize(&raw, &DataType::Weather).records;

    assert_eq!(rs.get(0, "location"), Some(&Value::from("Seattle")));
    assert!((f64_at(&rs, 0, "temperature") - 100.0).abs() < 1e-9);
    assert!((f64_at(&rs, 0, "wind_speed") - 4.4704).abs() < 1e-9);
    assert_eq!(rs.get(0, "units"), Some(&Value::from("metric")));
}

#[test]
fn naive_times_are_read_in_the_configured_zone() {
    let config = StandardizerConfig {
        default_timezone: chrono_tz::America::New_York,
        ..StandardizerConfig::default()
    };
    let raw = records(json!([
        {"series_id": "GDP", "timestamp": "2024-01-02 09:30:00", "value": 1.0}
    ]));

    let rs = Standardizer::new(config).standardize(&raw, &DataType::Economic).records;

    assert_eq!(
        rs.get(0, "timestamp"),
        Some(&Value::Timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()))
    );
}

#[test]
fn intraday_crypto_is_resampled_to_hourly_bars() {
    let minutes = [0, 15, 30, 45, 60, 75, 90, 105];
    let rows: Vec<serde_json::Value> = minutes
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(*m);
            json!({
                "symbol": "BTCUSDT",
                "exchange": "binance",
                "timestamp": ts.to_rfc3339(),
                "open": 100.0 + i as f64,
                "high": 110.0 + i as f64,
                "low": 90.0 + i as f64,
                "close": 105.0 + i as f64,
                "volume": 10
            })
        })
        .collect();

    let out = Standardizer::default().standardize(&RecordSet::from_json_rows(&rows), &DataType::Crypto);
    let rs = &out.records;

    assert_eq!(rs.len(), 2);
    assert_eq!(out.granularity, Some(Granularity::Hour1));
    assert_eq!(rs.get(0, "granularity"), Some(&Value::from("1h")));
    assert_eq!(rs.get(0, "open"), Some(&Value::Float(100.0)));
    assert_eq!(rs.get(0, "high"), Some(&Value::Float(113.0)));
    assert_eq!(rs.get(0, "low"), Some(&Value::Float(90.0)));
    assert_eq!(rs.get(0, "close"), Some(&Value::Float(108.0)));
    assert_eq!(rs.get(0, "volume"), Some(&Value::Int(40)));
    assert_eq!(
        rs.get(1, "timestamp"),
        Some(&Value::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()))
    );
}

#[test]
fn resampling_can_be_disabled() {
    let config = StandardizerConfig {
        resample: false,
        ..StandardizerConfig::default()
    };
    let raw = records(json!([
        {"symbol": "EURUSD", "timestamp": "2024-01-01T00:00:00Z", "open": 1.1, "high": 1.1, "low": 1.1, "close": 1.1},
        {"symbol": "EURUSD", "timestamp": "2024-01-01T00:05:00Z", "open": 1.1, "high": 1.1, "low": 1.1, "close": 1.1}
    ]));

    let out = Standardizer::new(config).standardize(&raw, &DataType::Forex);

    assert_eq!(out.records.len(), 2);
    assert_eq!(out.granularity, Some(Granularity::Minute5));
}

#[test]
fn duplicates_keep_the_last_row() {
    let raw = records(json!([
        {"symbol": "AAPL", "date": "2024-01-02", "open": 1, "high": 1, "low": 1, "close": 1.0, "volume": 1},
        {"symbol": "AAPL", "date": "2024-01-02", "open": 1, "high": 1, "low": 1, "close": 2.0, "volume": 1}
    ]));

    let rs = Standardizer::default().standardize(&raw, &DataType::Stock).records;

    assert_eq!(rs.len(), 1);
    assert_eq!(rs.get(0, "close"), Some(&Value::Float(2.0)));
}

#[test]
fn unreadable_values_become_null_with_a_warning() {
    let raw = records(json!([
        {"symbol": "AAPL", "date": "2024-01-02", "open": 1, "high": 1, "low": "n/a", "close": "abc", "volume": 1}
    ]));

    let out = Standardizer::default().standardize(&raw, &DataType::Stock);

    assert_eq!(out.records.get(0, "close"), Some(&Value::Null));
    assert_eq!(out.records.get(0, "low"), Some(&Value::Null));
    let failures: Vec<&StandardizationWarning> = out
        .warnings
        .iter()
        .filter(|w| matches!(w, StandardizationWarning::CoercionFailed { .. }))
        .collect();
    // A missing-value marker is not a failure.
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], StandardizationWarning::CoercionFailed { column, count: 1, .. } if column == "close"));
}

#[test]
fn empty_input_is_reported_not_failed() {
    let out = Standardizer::default().standardize(&RecordSet::default(), &DataType::Stock);

    assert!(out.records.is_empty());
    assert_eq!(out.warnings, vec![StandardizationWarning::EmptyInput]);
    assert_eq!(out.granularity, None);
}
