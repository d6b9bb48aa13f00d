/// Default values shared by the config layer and the component configs.

// Pipeline
pub const DEFAULT_PIPELINE_ID: &str = "market_ingest";
pub const DEFAULT_DATABASE: &str = "data/market_ingest.db";
pub const DEFAULT_LOG_DIR: &str = "logs";

// Loader
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const METADATA_TABLE: &str = "pipeline_metadata";

// Validator
pub const DEFAULT_VALIDITY_THRESHOLD: f64 = 0.95;
pub const DEFAULT_MISSING_VALUE_THRESHOLD: f64 = 0.1;
pub const DEFAULT_ANOMALY_ZSCORE_THRESHOLD: f64 = 3.0;

// Standardizer
pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_CRYPTO_QUOTE: &str = "USDT";

// Gateway
pub const DEFAULT_API_KEY_PARAM: &str = "apikey";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 1;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 60;
pub const DEFAULT_TIME_WINDOW_SECS: u64 = 60;
pub const USER_AGENT: &str = concat!("market_ingest/", env!("CARGO_PKG_VERSION"));
