//! Data shapes shared by every pipeline stage.

pub mod record_set;
pub mod value;

pub use record_set::{JsonRow, RecordSet};
pub use value::Value;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared kind of a batch. Drives alias tables, schemas, natural keys and
/// target granularity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Stock,
    Crypto,
    Forex,
    Economic,
    Weather,
    Sentiment,
    /// Anything without a schema; only structural and timestamp checks apply.
    Other(String),
}

impl DataType {
    pub fn as_str(&self) -> &str {
        match self {
            DataType::Stock => "stock",
            DataType::Crypto => "crypto",
            DataType::Forex => "forex",
            DataType::Economic => "economic",
            DataType::Weather => "weather",
            DataType::Sentiment => "sentiment",
            DataType::Other(name) => name.as_str(),
        }
    }

    /// Stock, crypto and forex carry OHLC prices.
    pub fn is_tradable(&self) -> bool {
        matches!(self, DataType::Stock | DataType::Crypto | DataType::Forex)
    }

    /// Columns that identify one logical observation.
    pub fn natural_key(&self) -> &'static [&'static str] {
        match self {
            DataType::Stock | DataType::Forex => &["timestamp", "symbol"],
            DataType::Crypto => &["timestamp", "symbol", "exchange"],
            DataType::Economic => &["timestamp", "series_id"],
            DataType::Weather => &["timestamp", "location"],
            DataType::Sentiment => &["timestamp", "entity", "source"],
            DataType::Other(_) => &["timestamp"],
        }
    }

    /// Natural key without the timestamp: the series a row belongs to.
    pub fn identifier_columns(&self) -> Vec<&'static str> {
        self.natural_key()
            .iter()
            .copied()
            .filter(|c| *c != "timestamp")
            .collect()
    }

    pub fn default_table(&self) -> String {
        match self {
            DataType::Stock => "stock_prices".to_string(),
            DataType::Crypto => "crypto_prices".to_string(),
            DataType::Forex => "forex_rates".to_string(),
            DataType::Economic => "economic_indicators".to_string(),
            DataType::Weather => "weather_data".to_string(),
            DataType::Sentiment => "sentiment_data".to_string(),
            DataType::Other(name) => format!("{}_records", name),
        }
    }

    /// Conflict columns used for upserts into `default_table`.
    pub fn default_conflict_key(&self) -> &'static [&'static str] {
        match self {
            DataType::Stock => &["symbol", "date"],
            DataType::Crypto => &["symbol", "exchange", "timestamp"],
            DataType::Forex => &["symbol", "timestamp"],
            DataType::Economic => &["series_id", "date"],
            DataType::Weather => &["location", "timestamp"],
            DataType::Sentiment => &["source", "entity", "timestamp"],
            DataType::Other(_) => &["timestamp"],
        }
    }
}

impl From<&str> for DataType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "stock" | "stocks" | "equity" => DataType::Stock,
            "crypto" | "cryptocurrency" => DataType::Crypto,
            "forex" | "fx" => DataType::Forex,
            "economic" | "economics" | "macro" => DataType::Economic,
            "weather" => DataType::Weather,
            "sentiment" | "news" => DataType::Sentiment,
            other => DataType::Other(other.to_string()),
        }
    }
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        DataType::from(value.as_str())
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_and_falls_back_to_other() {
        assert_eq!(DataType::from("Stock"), DataType::Stock);
        assert_eq!(DataType::from("fx"), DataType::Forex);
        assert_eq!(DataType::from("options"), DataType::Other("options".into()));
    }

    #[test]
    fn identifier_columns_drop_timestamp() {
        assert_eq!(DataType::Crypto.identifier_columns(), vec!["symbol", "exchange"]);
        assert!(DataType::Other("x".into()).identifier_columns().is_empty());
    }
}
