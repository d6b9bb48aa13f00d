use crate::domain::{DataType, Value};

/// Listing-venue suffixes providers append to tickers.
const EXCHANGE_SUFFIXES: &[&str] = &[".US", ".O", ".N", ".TO", ".V", ".AX", ".L", ".DE"];

const EQUITY_ALIASES: &[(&str, &str)] = &[("GOOG.O", "GOOGL"), ("BRK.B", "BRK-B")];

const CRYPTO_ALIASES: &[(&str, &str)] = &[
    ("BTC-USD", "BTCUSDT"),
    ("BTC/USD", "BTCUSDT"),
    ("ETH-USD", "ETHUSDT"),
    ("ETH/USD", "ETHUSDT"),
];

const FOREX_ALIASES: &[(&str, &str)] = &[
    ("EUR/USD", "EURUSD"),
    ("GBP/USD", "GBPUSD"),
    ("USD/JPY", "USDJPY"),
    ("AUD/USD", "AUDUSD"),
    ("USD/CAD", "USDCAD"),
];

/// Provider spellings rewritten for symbols of `data_type`.
fn aliases_for(data_type: &DataType) -> &'static [(&'static str, &'static str)] {
    match data_type {
        DataType::Stock => EQUITY_ALIASES,
        DataType::Crypto => CRYPTO_ALIASES,
        DataType::Forex => FOREX_ALIASES,
        _ => &[],
    }
}

/// Quote currencies a crypto pair may already end in.
const CRYPTO_QUOTES: &[&str] = &["USDT", "USDC", "BUSD", "USD", "EUR", "BTC", "ETH"];

/// Canonical form of one identifier for `data_type`.
pub fn normalize_symbol(raw: &str, data_type: &DataType, crypto_quote: &str) -> String {
    let mut symbol = raw.trim().to_uppercase();
    let aliases = aliases_for(data_type);

    if let Some((_, alias)) = aliases.iter().find(|(from, _)| *from == symbol) {
        symbol = (*alias).to_string();
    } else if let Some(suffix) = EXCHANGE_SUFFIXES
        .iter()
        .find(|s| symbol.len() > s.len() && symbol.ends_with(*s))
    {
        symbol.truncate(symbol.len() - suffix.len());
        if let Some((_, alias)) = aliases.iter().find(|(from, _)| *from == symbol) {
            symbol = (*alias).to_string();
        }
    }

    match data_type {
        DataType::Crypto => {
            symbol.retain(|c| !matches!(c, '-' | '/' | '_' | ' '));
            let has_quote = std::iter::once(crypto_quote)
                .chain(CRYPTO_QUOTES.iter().copied())
                .any(|q| symbol.len() > q.len() && symbol.ends_with(q));
            if !has_quote && !symbol.is_empty() {
                symbol.push_str(crypto_quote);
            }
        }
        DataType::Forex => symbol.retain(|c| c != '/'),
        _ => {}
    }
    symbol
}

pub fn normalize_symbol_value(value: &Value, data_type: &DataType, crypto_quote: &str) -> Value {
    match value {
        Value::Text(s) => Value::Text(normalize_symbol(s, data_type, crypto_quote)),
        other => other.clone(),
    }
}
