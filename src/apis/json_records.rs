use crate::app::ports::{Params, PayloadFetcher, ProviderAdapter};
use crate::domain::{DataType, RecordSet, Value};
use crate::error::GatewayError;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Where the records sit inside a provider payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum RecordsLayout {
    /// An array of row objects at a JSON pointer (`""` is the root).
    Array {
        #[serde(default)]
        pointer: String,
    },
    /// An object whose keys (usually dates) map to row objects; the key is
    /// stored in `key_column`.
    KeyedObject {
        #[serde(default)]
        pointer: String,
        key_column: String,
    },
}

impl Default for RecordsLayout {
    fn default() -> Self {
        RecordsLayout::Array {
            pointer: String::new(),
        }
    }
}

impl RecordsLayout {
    /// Pull the row objects out of `payload`.
    pub fn extract(&self, payload: &serde_json::Value) -> Result<RecordSet, String> {
        match self {
            RecordsLayout::Array { pointer } => {
                let node = locate(payload, pointer)?;
                let items = node
                    .as_array()
                    .ok_or_else(|| format!("expected an array at '{}'", pointer))?;
                Ok(RecordSet::from_json_rows(items))
            }
            RecordsLayout::KeyedObject {
                pointer,
                key_column,
            } => {
                let node = locate(payload, pointer)?;
                let map = node
                    .as_object()
                    .ok_or_else(|| format!("expected an object at '{}'", pointer))?;
                let rows: Vec<serde_json::Value> = map
                    .iter()
                    .filter_map(|(key, row)| {
                        let mut obj = row.as_object()?.clone();
                        obj.insert(key_column.clone(), serde_json::Value::String(key.clone()));
                        Some(serde_json::Value::Object(obj))
                    })
                    .collect();
                Ok(RecordSet::from_json_rows(&rows))
            }
        }
    }
}

fn locate<'a>(payload: &'a serde_json::Value, pointer: &str) -> Result<&'a serde_json::Value, String> {
    payload
        .pointer(pointer)
        .ok_or_else(|| format!("no records at '{}'", pointer))
}

/// Generic adapter for JSON APIs that return tabular rows.
///
/// One `fetch_records(item)` is one gateway call: static params plus the
/// item under `item_param`, records extracted by `layout`, and the item
/// stamped into `item_column` when the payload does not carry it.
pub struct JsonRecordsAdapter {
    name: String,
    fetcher: Arc<dyn PayloadFetcher>,
    data_type: DataType,
    endpoint: String,
    params: Params,
    item_param: Option<String>,
    item_column: Option<String>,
    layout: RecordsLayout,
}

impl JsonRecordsAdapter {
    pub fn new(
        name: impl Into<String>,
        fetcher: Arc<dyn PayloadFetcher>,
        data_type: DataType,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            fetcher,
            data_type,
            endpoint: endpoint.into(),
            params: Params::new(),
            item_param: None,
            item_column: None,
            layout: RecordsLayout::default(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_item_param(mut self, param: impl Into<String>) -> Self {
        self.item_param = Some(param.into());
        self
    }

    pub fn with_item_column(mut self, column: impl Into<String>) -> Self {
        self.item_column = Some(column.into());
        self
    }

    pub fn with_layout(mut self, layout: RecordsLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ProviderAdapter for JsonRecordsAdapter {
    fn data_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn fetch_records(&self, item: &str) -> Result<RecordSet, GatewayError> {
        let mut params = self.params.clone();
        if let Some(param) = &self.item_param {
            params.insert(param.clone(), item.to_string());
        }
        debug!(adapter = %self.name, item, endpoint = %self.endpoint, "Fetching records");

        let payload = self.fetcher.fetch(&self.endpoint, &params)?;
        let mut records = self.layout.extract(&payload).map_err(|message| GatewayError::Parse {
            source_name: self.name.clone(),
            message,
        })?;

        if let Some(column) = &self.item_column {
            if !records.has_column(column) {
                records.add_column(column, Value::from(item));
            }
        }

        info!(
            adapter = %self.name,
            item,
            data_type = %self.data_type,
            rows = records.len(),
            "Fetched records"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Canned {
        payload: serde_json::Value,
        seen: Mutex<Vec<Params>>,
    }

    impl PayloadFetcher for Canned {
        fn fetch(&self, _endpoint: &str, params: &Params) -> Result<serde_json::Value, GatewayError> {
            self.seen.lock().unwrap().push(params.clone());
            Ok(self.payload.clone())
        }
    }

    fn canned(payload: serde_json::Value) -> Arc<Canned> {
        Arc::new(Canned {
            payload,
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn array_layout_at_pointer() {
        let fetcher = canned(json!({"data": {"rows": [{"close": 1.5}, {"close": 2.0}]}}));
        let adapter = JsonRecordsAdapter::new("demo", fetcher.clone(), DataType::Stock, "/prices")
            .with_item_param("symbol")
            .with_item_column("symbol")
            .with_layout(RecordsLayout::Array {
                pointer: "/data/rows".into(),
            });

        let rs = adapter.fetch_records("AAPL").unwrap();
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.get(1, "symbol"), Some(&Value::from("AAPL")));
        assert_eq!(fetcher.seen.lock().unwrap()[0].get("symbol").map(String::as_str), Some("AAPL"));
    }

    #[test]
    fn keyed_object_layout_keeps_keys() {
        let fetcher = canned(json!({
            "Time Series (Daily)": {
                "2024-01-02": {"1. open": "185.0"},
                "2024-01-03": {"1. open": "184.2"}
            }
        }));
        let adapter = JsonRecordsAdapter::new("av", fetcher, DataType::Stock, "query").with_layout(
            RecordsLayout::KeyedObject {
                pointer: "/Time Series (Daily)".into(),
                key_column: "date".into(),
            },
        );
        let rs = adapter.fetch_records("MSFT").unwrap();
        assert_eq!(rs.len(), 2);
        assert!(rs.has_column("date"));
        assert!(rs.has_column("1. open"));
    }

    #[test]
    fn missing_pointer_is_a_parse_error() {
        let adapter = JsonRecordsAdapter::new("demo", canned(json!({"error": "bad"})), DataType::Stock, "x")
            .with_layout(RecordsLayout::Array {
                pointer: "/data".into(),
            });
        let err = adapter.fetch_records("AAPL").unwrap_err();
        assert!(matches!(err, GatewayError::Parse { .. }));
    }
}
