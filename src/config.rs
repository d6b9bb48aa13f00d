//! TOML configuration for the binary. The library components never read
//! files; they take the plain structs produced here.

use crate::apis::RecordsLayout;
use crate::app::ingest_use_case::LoadTarget;
use crate::app::ports::{Method, Params};
use crate::constants;
use crate::domain::DataType;
use crate::error::{IngestError, Result};
use crate::pipeline::ingestion::{RateLimitConfig, RetryPolicy, SourceConfig};
use crate::pipeline::load::LoaderConfig;
use crate::pipeline::processing::clean::CleanerConfig;
use crate::pipeline::processing::quality_gate::ValidatorConfig;
use crate::pipeline::processing::standardize::units::default_currency_rates;
use crate::pipeline::processing::standardize::StandardizerConfig;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub sources: Vec<SourceSection>,
    #[serde(default)]
    pub jobs: Vec<JobSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub pipeline_id: String,
    pub database: PathBuf,
    pub log_dir: PathBuf,
    pub chunk_size: usize,
    pub stamp_loaded_at: bool,
    pub validity_threshold: f64,
    pub default_currency: String,
    pub default_timezone: String,
    pub crypto_quote_currency: String,
    pub resample: bool,
    /// Impute and dedupe standardized batches before validation
    pub clean: bool,
    pub missing_value_threshold: f64,
    pub anomaly_zscore_threshold: f64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            pipeline_id: constants::DEFAULT_PIPELINE_ID.to_string(),
            database: PathBuf::from(constants::DEFAULT_DATABASE),
            log_dir: PathBuf::from(constants::DEFAULT_LOG_DIR),
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            stamp_loaded_at: false,
            validity_threshold: constants::DEFAULT_VALIDITY_THRESHOLD,
            default_currency: constants::DEFAULT_CURRENCY.to_string(),
            default_timezone: constants::DEFAULT_TIMEZONE.to_string(),
            crypto_quote_currency: constants::DEFAULT_CRYPTO_QUOTE.to_string(),
            resample: true,
            clean: false,
            missing_value_threshold: constants::DEFAULT_MISSING_VALUE_THRESHOLD,
            anomaly_zscore_threshold: constants::DEFAULT_ANOMALY_ZSCORE_THRESHOLD,
        }
    }
}

/// One `[[sources]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    pub name: String,
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    #[serde(default = "default_api_key_param")]
    pub api_key_param: String,
    /// Leave unset for an unthrottled source
    pub max_requests: Option<u32>,
    #[serde(default = "default_time_window")]
    pub time_window_secs: u64,
    /// Defaults to the time window
    pub retry_delay_secs: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    #[serde(default)]
    pub method: HttpMethod,
    /// Overrides of the `[pipeline]` validation thresholds for this source
    #[serde(default)]
    pub validation: ValidationOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationOverrides {
    pub missing_value_threshold: Option<f64>,
    pub anomaly_zscore_threshold: Option<f64>,
    pub validity_threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl From<HttpMethod> for Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => Method::Get,
            HttpMethod::Post => Method::Post,
        }
    }
}

fn default_api_key_param() -> String {
    constants::DEFAULT_API_KEY_PARAM.to_string()
}
fn default_time_window() -> u64 {
    constants::DEFAULT_TIME_WINDOW_SECS
}
fn default_max_retries() -> u32 {
    constants::DEFAULT_MAX_RETRIES
}
fn default_timeout() -> u64 {
    constants::DEFAULT_TIMEOUT_SECS
}
fn default_backoff_base() -> u64 {
    constants::DEFAULT_BACKOFF_BASE_SECS
}
fn default_backoff_max() -> u64 {
    constants::DEFAULT_BACKOFF_MAX_SECS
}

/// One `[[jobs]]` entry: a set of items fetched from one source endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSection {
    pub name: String,
    pub source: String,
    pub data_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub params: Params,
    pub item_param: Option<String>,
    pub item_column: Option<String>,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub records: RecordsLayout,
    pub table: Option<String>,
    pub conflict_columns: Option<Vec<String>>,
}

impl JobSection {
    pub fn data_type(&self) -> DataType {
        DataType::from(self.data_type.as_str())
    }

    /// Configured table and key, falling back to the data type's defaults.
    pub fn target(&self) -> LoadTarget {
        let defaults = LoadTarget::for_data_type(&self.data_type());
        LoadTarget::new(
            self.table.clone().unwrap_or(defaults.table),
            self.conflict_columns.clone().unwrap_or(defaults.conflict_columns),
        )
    }
}

impl AppConfig {
    /// Read `path`, loading `.env` first so `api_key_env` variables resolve.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if dotenv::dotenv().is_ok() {
            debug!("Loaded .env");
        }
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.pipeline.timezone()?;
        check_thresholds(
            "pipeline",
            Some(self.pipeline.missing_value_threshold),
            Some(self.pipeline.validity_threshold),
            Some(self.pipeline.anomaly_zscore_threshold),
        )?;

        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(IngestError::Config(format!("duplicate source '{}'", source.name)));
            }
            let overrides = &source.validation;
            check_thresholds(
                &format!("source '{}'", source.name),
                overrides.missing_value_threshold,
                overrides.validity_threshold,
                overrides.anomaly_zscore_threshold,
            )?;
            if source.max_requests == Some(0) {
                return Err(IngestError::Config(format!(
                    "source '{}': max_requests must be at least 1",
                    source.name
                )));
            }
        }
        for job in &self.jobs {
            if !names.contains(job.source.as_str()) {
                return Err(IngestError::Config(format!(
                    "job '{}' references unknown source '{}'",
                    job.name, job.source
                )));
            }
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<&SourceSection> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn standardizer_config(&self) -> Result<StandardizerConfig> {
        Ok(StandardizerConfig {
            default_timezone: self.pipeline.timezone()?,
            default_currency: self.pipeline.default_currency.to_uppercase(),
            currency_rates: default_currency_rates(),
            crypto_quote_currency: self.pipeline.crypto_quote_currency.to_uppercase(),
            resample: self.pipeline.resample,
        })
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            missing_value_threshold: self.pipeline.missing_value_threshold,
            anomaly_zscore_threshold: self.pipeline.anomaly_zscore_threshold,
            validity_threshold: self.pipeline.validity_threshold,
            ..ValidatorConfig::default()
        }
    }

    /// Validator thresholds for batches from `source`, with its overrides applied.
    pub fn validator_config_for(&self, source: &str) -> ValidatorConfig {
        let mut config = self.validator_config();
        if let Some(overrides) = self.source(source).map(|s| &s.validation) {
            if let Some(v) = overrides.missing_value_threshold {
                config.missing_value_threshold = v;
            }
            if let Some(v) = overrides.anomaly_zscore_threshold {
                config.anomaly_zscore_threshold = v;
            }
            if let Some(v) = overrides.validity_threshold {
                config.validity_threshold = v;
            }
        }
        config
    }

    pub fn cleaner_config(&self) -> CleanerConfig {
        CleanerConfig {
            missing_value_threshold: self.pipeline.missing_value_threshold,
        }
    }

    pub fn cleaner_config_for(&self, source: &str) -> CleanerConfig {
        CleanerConfig {
            missing_value_threshold: self.validator_config_for(source).missing_value_threshold,
        }
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            chunk_size: self.pipeline.chunk_size,
            stamp_loaded_at: self.pipeline.stamp_loaded_at,
            ..LoaderConfig::default()
        }
    }
}

fn check_thresholds(
    scope: &str,
    missing: Option<f64>,
    validity: Option<f64>,
    zscore: Option<f64>,
) -> Result<()> {
    for (name, value) in [("missing_value_threshold", missing), ("validity_threshold", validity)] {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                return Err(IngestError::Config(format!(
                    "{}: {} must be between 0 and 1, got {}",
                    scope, name, v
                )));
            }
        }
    }
    if let Some(z) = zscore {
        if z.is_nan() || z <= 0.0 {
            return Err(IngestError::Config(format!(
                "{}: anomaly_zscore_threshold must be positive, got {}",
                scope, z
            )));
        }
    }
    Ok(())
}

impl PipelineSection {
    pub fn timezone(&self) -> Result<Tz> {
        self.default_timezone.parse::<Tz>().map_err(|e| {
            IngestError::Config(format!("invalid default_timezone '{}': {}", self.default_timezone, e))
        })
    }
}

impl SourceSection {
    /// Resolve the key from the environment and build the gateway config.
    pub fn to_source_config(&self) -> Result<SourceConfig> {
        let mut config = SourceConfig::new(&self.name, &self.base_url).with_retry(RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs(self.backoff_base_secs),
            max_delay: Duration::from_secs(self.backoff_max_secs),
        });
        config.api_key_param = self.api_key_param.clone();
        config.timeout = Duration::from_secs(self.timeout_secs);

        if let Some(var) = &self.api_key_env {
            let key = std::env::var(var).map_err(|e| {
                warn!(source = %self.name, variable = %var, "API key variable not set");
                IngestError::Env(e)
            })?;
            config = config.with_api_key(key);
        }

        if let Some(max_requests) = self.max_requests {
            let window = Duration::from_secs(self.time_window_secs);
            let delay = self.retry_delay_secs.map(Duration::from_secs).unwrap_or(window);
            config = config.with_rate_limit(RateLimitConfig::new(max_requests, window, delay));
        }
        Ok(config)
    }
}
