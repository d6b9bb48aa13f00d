use crate::domain::{DataType, JsonRow, RecordSet};
use crate::error::{GatewayError, StoreError, TransportError};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Time source for anything that waits. Production code uses
/// `infra::clock::SystemClock`; tests swap in a manual clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

pub type Params = BTreeMap<String, String>;

/// GET sends `params` as the query string, POST as a JSON body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub params: Params,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub bytes: Vec<u8>,
}

// Ingest-side ports
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Per-source fetch capability: one endpoint call, parsed payload back.
pub trait PayloadFetcher: Send + Sync {
    fn fetch(&self, endpoint: &str, params: &Params) -> Result<serde_json::Value, GatewayError>;
}

/// Supplies the raw records for one logical item (symbol, series, location).
pub trait ProviderAdapter: Send + Sync {
    fn data_type(&self) -> DataType;
    fn fetch_records(&self, item: &str) -> Result<RecordSet, GatewayError>;
}

/// Storage sink keyed by natural-key upserts.
pub trait PersistencePort: Send + Sync {
    /// Insert-or-update each row on `conflict_columns`; returns accepted rows.
    fn upsert(
        &self,
        table: &str,
        rows: &[JsonRow],
        conflict_columns: &[String],
    ) -> Result<usize, StoreError>;

    fn insert(&self, table: &str, row: &JsonRow) -> Result<(), StoreError>;

    /// Greatest stored value of `column` among rows matching every filter.
    fn latest_value(
        &self,
        table: &str,
        column: &str,
        filters: &[(String, serde_json::Value)],
    ) -> Result<Option<serde_json::Value>, StoreError>;
}
