use chrono::{Duration, TimeZone, Utc};
use market_ingest::domain::{DataType, RecordSet, Value};
use market_ingest::pipeline::processing::quality_gate::{
    ReportFormat, ValidationLevel, Validator, ValidatorConfig,
};
use serde_json::json;

fn ts(day: u32, hour: u32) -> Value {
    Value::Timestamp(Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap())
}

fn forex_rows(closes: &[f64]) -> RecordSet {
    let columns = ["timestamp", "symbol", "open", "high", "low", "close"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let rows = closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            vec![
                ts(2, i as u32),
                Value::from("EURUSD"),
                Value::Float(1.1),
                Value::Float(1.2),
                Value::Float(1.0),
                Value::Float(*close),
            ]
        })
        .collect();
    RecordSet::from_rows(columns, rows)
}

fn stock_rows(n: usize) -> RecordSet {
    let columns = ["timestamp", "symbol", "open", "high", "low", "close", "volume"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let rows = (0..n)
        .map(|i| {
            vec![
                ts(1 + i as u32, 0),
                Value::from("AAPL"),
                Value::Float(100.0),
                Value::Float(101.0),
                Value::Float(99.0),
                Value::Float(100.5),
                Value::Int(1000),
            ]
        })
        .collect();
    RecordSet::from_rows(columns, rows)
}

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
}

#[test]
fn negative_close_is_an_error_and_the_row_is_filtered() {
    let batch = forex_rows(&[1.1, -1.2, 1.15]);

    let (filtered, summary) =
        Validator::default().validate_at(&batch, &DataType::Forex, ValidationLevel::Error, now());

    let finding = summary.find("positive_values_close").expect("positivity finding");
    assert_eq!(finding.level(), ValidationLevel::Error);
    assert!(!finding.passed());
    assert_eq!(finding.detail("negative_count"), Some(&json!(1)));

    assert!(!Validator::default().is_valid(&summary));
    assert_eq!(filtered.len(), 2);
    assert!((0..filtered.len()).all(|r| filtered.get(r, "close").and_then(Value::as_f64).unwrap() > 0.0));
}

#[test]
fn clean_batch_is_valid_and_untouched() {
    let batch = stock_rows(5);

    let (filtered, summary) =
        Validator::default().validate_at(&batch, &DataType::Stock, ValidationLevel::Error, now());

    assert!(Validator::default().is_valid(&summary));
    assert_eq!(summary.failed(), 0);
    let required = summary.find("required_columns").expect("always reported");
    assert_eq!(required.level(), ValidationLevel::Info);
    assert!(required.passed());
    assert_eq!(filtered, batch);
}

#[test]
fn high_below_low_breaks_consistency() {
    let mut batch = stock_rows(3);
    batch.set(1, "high", Value::Float(90.0));

    let (_, summary) =
        Validator::default().validate_at(&batch, &DataType::Stock, ValidationLevel::Info, now());

    let finding = summary.find("consistency_high_gte_low").expect("consistency finding");
    assert_eq!(finding.level(), ValidationLevel::Error);
    assert_eq!(finding.detail("violation_count"), Some(&json!(1)));
    assert_eq!(finding.detail("condition"), Some(&json!("high >= low")));
}

#[test]
fn missing_values_respect_the_threshold() {
    let config = ValidatorConfig {
        missing_value_threshold: 0.3,
        ..ValidatorConfig::default()
    };
    let validator = Validator::new(config);

    // One of five volumes missing: 20%, under the threshold.
    let mut batch = stock_rows(5);
    batch.set(2, "volume", Value::Null);
    let (_, summary) = validator.validate_at(&batch, &DataType::Stock, ValidationLevel::Info, now());
    let finding = summary.find("missing_values_volume").expect("missing value finding");
    assert_eq!(finding.level(), ValidationLevel::Warning);
    assert!(finding.passed());

    // Two of five: 40%, over it.
    batch.set(3, "volume", Value::Null);
    let (_, summary) = validator.validate_at(&batch, &DataType::Stock, ValidationLevel::Info, now());
    let finding = summary.find("missing_values_volume").expect("missing value finding");
    assert_eq!(finding.level(), ValidationLevel::Error);
    assert!(!finding.passed());
    assert_eq!(finding.detail("missing_count"), Some(&json!(2)));
}

#[test]
fn outliers_are_warnings_that_still_pass() {
    let mut batch = stock_rows(20);
    batch.set(7, "volume", Value::Int(1_000_000));

    let (_, summary) =
        Validator::default().validate_at(&batch, &DataType::Stock, ValidationLevel::Info, now());

    let finding = summary.find("anomalies_volume").expect("anomaly finding");
    assert_eq!(finding.level(), ValidationLevel::Warning);
    assert!(finding.passed());
    assert_eq!(finding.detail("anomaly_count"), Some(&json!(1)));
    assert!(Validator::default().is_valid(&summary));
}

#[test]
fn duplicate_natural_keys_are_errors() {
    let mut batch = stock_rows(3);
    batch.set(2, "timestamp", ts(1, 0));

    let (_, summary) =
        Validator::default().validate_at(&batch, &DataType::Stock, ValidationLevel::Info, now());

    let finding = summary.find("duplicate_records").expect("duplicate finding");
    assert_eq!(finding.detail("duplicate_count"), Some(&json!(2)));
    assert_eq!(finding.detail("unique_constraint_columns"), Some(&json!(["timestamp", "symbol"])));
}

#[test]
fn gaps_are_measured_against_the_median_interval() {
    let columns = vec!["timestamp".to_string(), "series_id".to_string(), "value".to_string()];
    let days = [1, 2, 3, 4, 8];
    let rows = days
        .iter()
        .map(|d| vec![ts(*d, 0), Value::from("GDP"), Value::Float(1.0)])
        .collect();
    let batch = RecordSet::from_rows(columns, rows);

    let (_, summary) =
        Validator::default().validate_at(&batch, &DataType::Economic, ValidationLevel::Info, now());

    let finding = summary.find("time_gaps").expect("gap finding");
    assert_eq!(finding.level(), ValidationLevel::Warning);
    assert_eq!(finding.detail("gap_count"), Some(&json!(1)));
    assert_eq!(finding.detail("largest_gap"), Some(&json!("4d 00:00:00")));
    assert_eq!(finding.detail("median_interval"), Some(&json!("1d 00:00:00")));
}

#[test]
fn future_and_null_timestamps() {
    let mut batch = stock_rows(3);
    batch.set(0, "timestamp", Value::Timestamp(now() + Duration::days(10)));
    batch.set(1, "timestamp", Value::Null);

    let (filtered, summary) =
        Validator::default().validate_at(&batch, &DataType::Stock, ValidationLevel::Error, now());

    let future = summary.find("future_timestamps").expect("future finding");
    assert_eq!(future.level(), ValidationLevel::Warning);
    assert_eq!(future.detail("future_count"), Some(&json!(1)));

    let nulls = summary.find("null_timestamps").expect("null finding");
    assert_eq!(nulls.level(), ValidationLevel::Error);
    assert!(filtered.len() < batch.len());
    assert!((0..filtered.len()).all(|r| filtered.get(r, "timestamp").is_some_and(|v| !v.is_null())));
}

#[test]
fn unknown_types_get_structural_checks_only() {
    let columns = vec!["timestamp".to_string(), "whatever".to_string()];
    let batch = RecordSet::from_rows(
        columns,
        vec![vec![ts(1, 0), Value::from("x")], vec![ts(2, 0), Value::from("y")]],
    );

    let (_, summary) = Validator::default().validate_at(
        &batch,
        &DataType::from("satellite"),
        ValidationLevel::Info,
        now(),
    );

    assert!(summary.find("required_columns").is_none());
    assert_eq!(summary.failed(), 0);
    assert!(Validator::default().is_valid(&summary));
}

#[test]
fn empty_batch_is_an_error() {
    let (_, summary) = Validator::default().validate_at(
        &RecordSet::default(),
        &DataType::Stock,
        ValidationLevel::Info,
        now(),
    );

    let finding = summary.find("empty_dataframe").expect("empty finding");
    assert_eq!(finding.level(), ValidationLevel::Error);
    assert_eq!(summary.total(), 1);
    assert!(!Validator::default().is_valid(&summary));
}

#[test]
fn info_floor_keeps_every_row() {
    let batch = forex_rows(&[1.1, -1.2, 1.15]);

    let (filtered, summary) =
        Validator::default().validate_at(&batch, &DataType::Forex, ValidationLevel::Info, now());

    assert!(!Validator::default().is_valid(&summary));
    assert_eq!(filtered.len(), 3);
}

#[test]
fn reports_list_failed_checks() {
    let batch = forex_rows(&[1.1, -1.2, 1.15]);
    let (_, summary) =
        Validator::default().validate_at(&batch, &DataType::Forex, ValidationLevel::Info, now());

    let text = summary.to_report(ReportFormat::Text, 0.95);
    assert!(text.contains("FAILED CHECKS:"));
    assert!(text.contains("positive_values_close"));

    let parsed: serde_json::Value =
        serde_json::from_str(&summary.to_report(ReportFormat::Json, 0.95)).unwrap();
    assert!(parsed.is_object());
}

#[test]
fn raw_text_timestamps_are_understood() {
    let raw = |stamps: &[&str]| {
        let rows: Vec<serde_json::Value> = stamps
            .iter()
            .map(|t| {
                json!({
                    "timestamp": t, "symbol": "AAPL", "open": 100.0, "high": 101.0,
                    "low": 99.0, "close": 100.5, "volume": 1000
                })
            })
            .collect();
        RecordSet::from_json_rows(&rows)
    };
    let validator = Validator::default();

    let (kept, summary) = validator.validate_at(
        &raw(&["2024-01-02", "2024-01-01", "2024-01-03 15:30:00"]),
        &DataType::Stock,
        ValidationLevel::Error,
        now(),
    );
    assert!(summary.find("null_timestamps").is_none());
    let order = summary.find("chronological_order").expect("order finding");
    assert_eq!(order.detail("non_chronological_count"), Some(&json!(1)));
    assert!(validator.is_valid(&summary));
    assert_eq!(kept.len(), 3);

    let (kept, summary) = validator.validate_at(
        &raw(&["2024-01-01", "2024-01-02", "not a date", "2024-01-03"]),
        &DataType::Stock,
        ValidationLevel::Error,
        now(),
    );
    let nulls = summary.find("null_timestamps").expect("null finding");
    assert_eq!(nulls.detail("null_count"), Some(&json!(1)));
    assert_eq!(kept.len(), 3);
}
