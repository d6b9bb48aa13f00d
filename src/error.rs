use thiserror::Error;

/// Raised by the rate limiter when a caller asks for a slot it was never given.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("source '{0}' has no registered rate limit")]
    UnregisteredSource(String),
}

/// Failure of one HTTP exchange below the status-code level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Coarse classification of gateway failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    Transient,
    Auth,
    RateLimited,
    Client,
    Parse,
    Configuration,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("request to '{source_name}' failed after {attempts} attempts: {last_error}")]
    Transient {
        source_name: String,
        attempts: u32,
        last_error: String,
    },

    #[error("request to '{source_name}' was rejected with HTTP {status} (check API key)")]
    Auth { source_name: String, status: u16 },

    #[error("request to '{source_name}' still rate limited after {attempts} attempts")]
    RateLimited { source_name: String, attempts: u32 },

    #[error("request to '{source_name}' failed with HTTP {status}: {body}")]
    Client {
        source_name: String,
        status: u16,
        body: String,
    },

    #[error("response from '{source_name}' could not be parsed: {message}")]
    Parse { source_name: String, message: String },

    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}

impl GatewayError {
    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            GatewayError::Transient { .. } => GatewayErrorKind::Transient,
            GatewayError::Auth { .. } => GatewayErrorKind::Auth,
            GatewayError::RateLimited { .. } => GatewayErrorKind::RateLimited,
            GatewayError::Client { .. } => GatewayErrorKind::Client,
            GatewayError::Parse { .. } => GatewayErrorKind::Parse,
            GatewayError::UnknownSource(_) | GatewayError::RateLimit(_) => {
                GatewayErrorKind::Configuration
            }
        }
    }

    /// Whether a later, independent attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            GatewayErrorKind::Transient | GatewayErrorKind::RateLimited
        )
    }
}

/// Failures of a persistence collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("row is missing conflict column '{0}'")]
    MissingConflictColumn(String),

    #[error("store rejected write: {0}")]
    Rejected(String),
}

/// Whole-load failures. Per-chunk failures never surface here; they land in
/// `LoadResult::errors`.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("conflict key is empty")]
    EmptyConflictKey,

    #[error("batch is missing conflict columns: {0:?}")]
    MissingConflictColumns(Vec<String>),

    #[error("invalid table name '{0}'")]
    InvalidTable(String),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
