use crate::domain::DataType;

/// Inclusive bounds for one numeric column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub column: &'static str,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Direction of a cross-column predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `left >= right`
    Gte,
    /// `left <= right`
    Lte,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Gte => "gte",
            Comparison::Lte => "lte",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Gte => ">=",
            Comparison::Lte => "<=",
        }
    }

    /// True when the pair breaks the predicate.
    pub fn violated(&self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Gte => left < right,
            Comparison::Lte => left > right,
        }
    }
}

/// Named predicate between two columns of the same row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consistency {
    pub left: &'static str,
    pub op: Comparison,
    pub right: &'static str,
    pub description: &'static str,
}

impl Consistency {
    pub fn check_name(&self) -> String {
        format!("consistency_{}_{}_{}", self.left, self.op.as_str(), self.right)
    }

    pub fn condition(&self) -> String {
        format!("{} {} {}", self.left, self.op.symbol(), self.right)
    }
}

/// Static description of what a well-formed batch of one data type looks like.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub required_columns: &'static [&'static str],
    pub numeric_columns: &'static [&'static str],
    pub positive_columns: &'static [&'static str],
    pub ranges: &'static [Range],
    pub consistency: &'static [Consistency],
}

const fn range(column: &'static str, min: f64, max: f64) -> Range {
    Range {
        column,
        min: Some(min),
        max: Some(max),
    }
}

const OHLC_CONSISTENCY: &[Consistency] = &[
    Consistency {
        left: "high",
        op: Comparison::Gte,
        right: "low",
        description: "High price should be >= low price",
    },
    Consistency {
        left: "high",
        op: Comparison::Gte,
        right: "open",
        description: "High price should be >= open price",
    },
    Consistency {
        left: "high",
        op: Comparison::Gte,
        right: "close",
        description: "High price should be >= close price",
    },
    Consistency {
        left: "low",
        op: Comparison::Lte,
        right: "open",
        description: "Low price should be <= open price",
    },
    Consistency {
        left: "low",
        op: Comparison::Lte,
        right: "close",
        description: "Low price should be <= close price",
    },
];

static STOCK: Schema = Schema {
    required_columns: &["timestamp", "symbol", "open", "high", "low", "close", "volume"],
    numeric_columns: &["open", "high", "low", "close", "volume", "adj_close"],
    positive_columns: &["open", "high", "low", "close", "volume"],
    ranges: &[
        range("open", 0.0, 1e6),
        range("high", 0.0, 1e6),
        range("low", 0.0, 1e6),
        range("close", 0.0, 1e6),
        range("volume", 0.0, 1e12),
        range("adj_close", 0.0, 1e6),
    ],
    consistency: OHLC_CONSISTENCY,
};

static CRYPTO: Schema = Schema {
    required_columns: &[
        "timestamp", "symbol", "open", "high", "low", "close", "volume", "exchange",
    ],
    numeric_columns: &["open", "high", "low", "close", "volume"],
    positive_columns: &["open", "high", "low", "close", "volume"],
    ranges: &[
        range("open", 0.0, 1e6),
        range("high", 0.0, 1e6),
        range("low", 0.0, 1e6),
        range("close", 0.0, 1e6),
        range("volume", 0.0, 1e15),
    ],
    consistency: OHLC_CONSISTENCY,
};

static FOREX: Schema = Schema {
    required_columns: &["timestamp", "symbol", "open", "high", "low", "close"],
    numeric_columns: &["open", "high", "low", "close"],
    positive_columns: &["open", "high", "low", "close"],
    ranges: &[
        range("open", 0.0001, 1000.0),
        range("high", 0.0001, 1000.0),
        range("low", 0.0001, 1000.0),
        range("close", 0.0001, 1000.0),
    ],
    consistency: OHLC_CONSISTENCY,
};

static ECONOMIC: Schema = Schema {
    required_columns: &["timestamp", "series_id", "value"],
    numeric_columns: &["value"],
    positive_columns: &[],
    ranges: &[range("value", -1e12, 1e12)],
    consistency: &[],
};

static WEATHER: Schema = Schema {
    required_columns: &[
        "timestamp", "location", "temperature", "humidity", "pressure", "wind_speed",
    ],
    numeric_columns: &["temperature", "humidity", "pressure", "wind_speed"],
    positive_columns: &[],
    // Celsius, percent, hPa, m/s
    ranges: &[
        range("temperature", -100.0, 100.0),
        range("humidity", 0.0, 100.0),
        range("pressure", 800.0, 1100.0),
        range("wind_speed", 0.0, 150.0),
    ],
    consistency: &[],
};

static SENTIMENT: Schema = Schema {
    required_columns: &["timestamp", "entity", "sentiment_score", "confidence"],
    numeric_columns: &["sentiment_score", "confidence"],
    positive_columns: &[],
    ranges: &[range("sentiment_score", -1.0, 1.0), range("confidence", 0.0, 1.0)],
    consistency: &[],
};

/// Schema for a data type; `None` for types without one.
pub fn schema_for(data_type: &DataType) -> Option<&'static Schema> {
    match data_type {
        DataType::Stock => Some(&STOCK),
        DataType::Crypto => Some(&CRYPTO),
        DataType::Forex => Some(&FOREX),
        DataType::Economic => Some(&ECONOMIC),
        DataType::Weather => Some(&WEATHER),
        DataType::Sentiment => Some(&SENTIMENT),
        DataType::Other(_) => None,
    }
}
