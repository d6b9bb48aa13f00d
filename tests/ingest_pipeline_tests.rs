use market_ingest::apis::{JsonRecordsAdapter, RecordsLayout};
use market_ingest::app::ingest_use_case::{IngestUseCase, LoadTarget};
use market_ingest::app::ports::{HttpRequest, HttpResponse, HttpTransport, Params};
use market_ingest::domain::{DataType, RecordSet};
use market_ingest::error::{GatewayError, IngestError, TransportError};
use market_ingest::infra::{InMemoryStore, ManualClock, SqliteStore};
use market_ingest::pipeline::ingestion::{RateLimitConfig, RateLimiter, RequestGateway, SourceClient, SourceConfig};
use market_ingest::pipeline::load::{Loader, RunStatus};
use market_ingest::pipeline::processing::clean::{Cleaner, CleanerConfig};
use market_ingest::pipeline::processing::quality_gate::Validator;
use market_ingest::pipeline::processing::standardize::Standardizer;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Serves a daily series per `symbol` parameter; unknown symbols get a 401.
struct DailySeries {
    requests: Mutex<Vec<HttpRequest>>,
}

impl DailySeries {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl HttpTransport for DailySeries {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let body = match request.params.get("symbol").map(String::as_str) {
            Some("AAPL") => json!({
                "Meta Data": {"2. Symbol": "AAPL"},
                "Time Series (Daily)": {
                    "2024-01-03": {"1. open": "184.0", "2. high": "185.2", "3. low": "183.1", "4. close": "184.3", "5. volume": "48000"},
                    "2024-01-02": {"1. open": "185.1", "2. high": "186.0", "3. low": "184.2", "4. close": "185.6", "5. volume": "52000"}
                }
            }),
            Some("BAD") => json!({
                "Time Series (Daily)": {
                    "2024-01-03": {"1. open": "-1", "2. high": "-1", "3. low": "-1", "4. close": "-1", "5. volume": "-5"},
                    "2024-01-02": {"1. open": "-2", "2. high": "-2", "3. low": "-2", "4. close": "-2", "5. volume": "-5"}
                }
            }),
            _ => {
                return Ok(HttpResponse {
                    status: 401,
                    bytes: b"{\"error\":\"invalid key\"}".to_vec(),
                })
            }
        };
        Ok(HttpResponse {
            status: 200,
            bytes: body.to_string().into_bytes(),
        })
    }
}

fn adapter(transport: Arc<DailySeries>) -> JsonRecordsAdapter {
    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(RateLimiter::new(clock.clone()));
    let mut gateway = RequestGateway::new(transport, limiter, clock);
    gateway.register_source(
        SourceConfig::new("alpha_vantage", "https://example.test")
            .with_api_key("secret")
            .with_rate_limit(RateLimitConfig::new(5, Duration::from_secs(60), Duration::from_secs(60))),
    );
    let client = SourceClient::new(Arc::new(gateway), "alpha_vantage");

    let mut params = Params::new();
    params.insert("function".to_string(), "TIME_SERIES_DAILY".to_string());
    JsonRecordsAdapter::new("alpha_vantage_daily", Arc::new(client), DataType::Stock, "query")
        .with_params(params)
        .with_item_param("symbol")
        .with_item_column("symbol")
        .with_layout(RecordsLayout::KeyedObject {
            pointer: "/Time Series (Daily)".to_string(),
            key_column: "date".to_string(),
        })
}

fn use_case(loader: Loader) -> IngestUseCase {
    IngestUseCase::new(
        Standardizer::default(),
        Validator::default(),
        Arc::new(loader),
        "daily_prices",
    )
}

#[test]
fn provider_payload_lands_in_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("market.db")).unwrap());
    let transport = Arc::new(DailySeries::new());
    let adapter = adapter(transport.clone());
    let pipeline = use_case(Loader::new(store.clone()));
    let target = LoadTarget::for_data_type(&DataType::Stock);

    let outcome = pipeline.ingest_item(&adapter, "AAPL", &target).unwrap();

    assert!(outcome.valid);
    assert_eq!(outcome.raw_rows, 2);
    assert_eq!(outcome.standardized_rows, 2);
    let load = outcome.load.expect("valid batch is loaded");
    assert_eq!(load.inserted, 2);
    assert_eq!(load.status(), RunStatus::Completed);
    assert_eq!(load.metadata.run_id(), outcome.run_id);
    assert_eq!(load.metadata.pipeline_id(), "daily_prices");

    let rows = store.fetch_all("stock_prices").unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.get("symbol") == Some(&json!("AAPL"))));
    assert!(rows.iter().any(|r| r.get("date") == Some(&json!("2024-01-02"))));

    {
        let request = &transport.requests.lock().unwrap()[0];
        assert_eq!(request.url, "https://example.test/query");
        assert_eq!(request.params.get("apikey").map(String::as_str), Some("secret"));
        assert_eq!(request.params.get("function").map(String::as_str), Some("TIME_SERIES_DAILY"));
    }

    // Running again keeps one row per symbol and date.
    pipeline.ingest_item(&adapter, "AAPL", &target).unwrap();
    assert_eq!(store.row_count("stock_prices").unwrap(), 2);
    assert_eq!(store.row_count("pipeline_metadata").unwrap(), 2);
}

#[test]
fn invalid_batches_are_not_loaded() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = use_case(Loader::new(store.clone()));
    let adapter = adapter(Arc::new(DailySeries::new()));

    let outcome = pipeline
        .ingest_item(&adapter, "BAD", &LoadTarget::for_data_type(&DataType::Stock))
        .unwrap();

    assert!(!outcome.valid);
    assert!(outcome.load.is_none());
    assert!(outcome.summary.find("positive_values_close").is_some());
    assert_eq!(store.row_count("stock_prices"), 0);
    assert_eq!(store.row_count("pipeline_metadata"), 0);
}

#[test]
fn auth_failures_surface_as_gateway_errors() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = use_case(Loader::new(store.clone()));
    let adapter = adapter(Arc::new(DailySeries::new()));

    let err = pipeline
        .ingest_item(&adapter, "NOPE", &LoadTarget::for_data_type(&DataType::Stock))
        .unwrap_err();

    assert!(matches!(err, IngestError::Gateway(GatewayError::Auth { status: 401, .. })));
    assert_eq!(store.row_count("stock_prices"), 0);
}

#[test]
fn custom_targets_are_honoured() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = use_case(Loader::new(store.clone()));
    let adapter = adapter(Arc::new(DailySeries::new()));
    let target = LoadTarget::new("equities_daily", vec!["symbol".to_string(), "timestamp".to_string()]);

    let outcome = pipeline.ingest_item(&adapter, "AAPL", &target).unwrap();

    assert_eq!(outcome.load.map(|l| l.inserted), Some(2));
    assert_eq!(store.row_count("equities_daily"), 2);
    assert_eq!(store.rows("pipeline_metadata")[0]["source"], json!("equities_daily"));
}

#[test]
fn cleaner_fills_sparse_gaps_before_validation() {
    let raw = RecordSet::from_json_rows(&[
        json!({"symbol": "AAPL", "date": "2024-01-02", "open": 1.0, "high": 2.5, "low": 0.5, "close": 1.0, "volume": 10}),
        json!({"symbol": "AAPL", "date": "2024-01-03", "open": 1.0, "high": 2.5, "low": 0.5, "close": null, "volume": 10}),
        json!({"symbol": "AAPL", "date": "2024-01-04", "open": 1.0, "high": 2.5, "low": 0.5, "close": 2.0, "volume": 10}),
    ]);
    let target = LoadTarget::for_data_type(&DataType::Stock);

    let plain = use_case(Loader::new(Arc::new(InMemoryStore::new())));
    let outcome = plain.ingest_records(&raw, &DataType::Stock, &target).unwrap();
    assert!(!outcome.valid);
    assert!(outcome.cleaning.is_none());

    let store = Arc::new(InMemoryStore::new());
    let cleaning = use_case(Loader::new(store.clone())).with_cleaner(Cleaner::new(CleanerConfig {
        missing_value_threshold: 0.5,
    }));
    let outcome = cleaning.ingest_records(&raw, &DataType::Stock, &target).unwrap();

    assert!(outcome.valid);
    let report = outcome.cleaning.expect("cleaner ran");
    assert_eq!(report.fill_for("close").map(|f| f.filled), Some(1));
    let rows = store.rows("stock_prices");
    let jan3 = rows
        .iter()
        .find(|r| r["date"] == json!("2024-01-03"))
        .expect("row for 2024-01-03");
    assert_eq!(jan3["close"], json!(1.5));
}
